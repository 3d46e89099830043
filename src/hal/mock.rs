//! Test doubles for the external seams.
//!
//! | Mock | Trait |
//! |------|-------|
//! | [`MockTransport`] | [`AccessoryTransport`](crate::traits::AccessoryTransport) |
//! | [`MockKeySource`] | [`KeySource`] |

use std::collections::VecDeque;

use crate::traits::{KeyEvent, KeySource};

#[cfg(feature = "dispatch")]
pub use transport::*;

// ============================================================================
// Key input
// ============================================================================

/// Mock key source returning queued events in order.
#[derive(Debug, Default)]
pub struct MockKeySource {
    queue: VecDeque<KeyEvent>,
}

impl MockKeySource {
    /// Creates an empty key source.
    pub fn new() -> Self {
        Self::default()
    }

    /// A key source that will type `text`.
    pub fn from_text(text: &str) -> Self {
        let mut source = Self::new();
        source.type_text(text);
        source
    }

    /// Queue one key event
    pub fn queue_key(&mut self, key: KeyEvent) {
        self.queue.push_back(key);
    }

    /// Queue a plain key for every character of `text`
    pub fn type_text(&mut self, text: &str) {
        self.queue.extend(text.chars().map(KeyEvent::char));
    }
}

impl KeySource for MockKeySource {
    fn next_key(&mut self) -> Option<KeyEvent> {
        self.queue.pop_front()
    }
}

// ============================================================================
// Transport
// ============================================================================

#[cfg(feature = "dispatch")]
mod transport {
    use core::future::Future;
    use core::time::Duration;
    use std::sync::{Mutex, PoisonError};

    use heapless::Vec as HVec;
    use thiserror::Error;
    use tokio::time::Instant;

    use crate::protocol::{Frame, WirePosition, FRAME_LEN};
    use crate::traits::{AccessoryTransport, CancelHandle, CancelToken};

    /// Failure injected by [`MockTransport`].
    #[derive(Clone, Debug, PartialEq, Eq, Error)]
    pub enum MockTransportError {
        /// Configured with [`MockTransport::fail_at`].
        #[error("bus refused frame {index}")]
        Refused {
            /// Zero-based index of the refused frame.
            index: usize,
        },
        /// The frame has the wrong length, opcode or checksum.
        #[error("malformed frame {bytes:02X?}")]
        Malformed {
            /// The rejected bytes.
            bytes: Vec<u8>,
        },
    }

    /// A frame accepted by the mock bus.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct SentFrame {
        /// Raw bytes.
        pub bytes: HVec<u8, FRAME_LEN>,
        /// When the write completed (tokio clock, so it follows paused time).
        pub at: Instant,
    }

    impl SentFrame {
        /// Decoded accessory address.
        pub fn address(&self) -> u16 {
            self.frame().map_or(0, |f| f.address())
        }

        /// Decoded direction.
        pub fn position(&self) -> WirePosition {
            self.frame().map_or(WirePosition::Thrown, |f| f.position())
        }

        fn frame(&self) -> Option<Frame> {
            Frame::decode(&self.bytes)
        }
    }

    /// Mock accessory bus.
    ///
    /// Validates and records every frame. Failures and cancellation can be
    /// injected at a given frame index to exercise partial delivery.
    ///
    /// # Example
    ///
    /// ```rust
    /// use yard_dispatch::hal::{MockTransport, MockTransportError};
    /// use yard_dispatch::protocol::{Frame, WirePosition};
    /// use yard_dispatch::traits::{AccessoryTransport, CancelToken};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let bus = MockTransport::new().fail_at(1);
    /// let frame = Frame::switch_request(12, WirePosition::Closed).unwrap();
    /// let never = CancelToken::never();
    ///
    /// assert!(bus.send(frame.as_bytes(), &never).await.is_ok());
    /// assert_eq!(
    ///     bus.send(frame.as_bytes(), &never).await,
    ///     Err(MockTransportError::Refused { index: 1 })
    /// );
    /// assert_eq!(bus.addresses(), vec![12]);
    /// # }
    /// ```
    #[derive(Debug, Default)]
    pub struct MockTransport {
        sent: Mutex<Vec<SentFrame>>,
        attempts: Mutex<usize>,
        fail_at: Option<usize>,
        cancel_after: Option<(usize, CancelHandle)>,
        write_latency: Duration,
    }

    impl MockTransport {
        /// Creates a bus that accepts everything instantly.
        pub fn new() -> Self {
            Self::default()
        }

        /// Refuse the write with this zero-based attempt index.
        pub fn fail_at(mut self, index: usize) -> Self {
            self.fail_at = Some(index);
            self
        }

        /// Fire `handle` as soon as `count` frames have been accepted.
        pub fn cancel_after(mut self, count: usize, handle: CancelHandle) -> Self {
            self.cancel_after = Some((count, handle));
            self
        }

        /// Take this long to acknowledge each write.
        pub fn with_write_latency(mut self, latency: Duration) -> Self {
            self.write_latency = latency;
            self
        }

        /// Copies of the accepted frames.
        pub fn frames(&self) -> Vec<SentFrame> {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }

        /// Number of accepted frames.
        pub fn frame_count(&self) -> usize {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        /// Decoded addresses of the accepted frames, in order.
        pub fn addresses(&self) -> Vec<u16> {
            self.frames().iter().map(SentFrame::address).collect()
        }

        /// Decoded `(address, position)` pairs, in order.
        pub fn decoded(&self) -> Vec<(u16, WirePosition)> {
            self.frames()
                .iter()
                .map(|f| (f.address(), f.position()))
                .collect()
        }

        /// Forget everything sent so far.
        pub fn reset(&self) {
            self.sent.lock().unwrap_or_else(PoisonError::into_inner).clear();
            *self.attempts.lock().unwrap_or_else(PoisonError::into_inner) = 0;
        }

        fn accept(&self, frame: &[u8]) -> Result<(), MockTransportError> {
            let index = {
                let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
                let index = *attempts;
                *attempts += 1;
                index
            };
            if self.fail_at == Some(index) {
                return Err(MockTransportError::Refused { index });
            }

            let malformed = || MockTransportError::Malformed {
                bytes: frame.to_vec(),
            };
            Frame::decode(frame).ok_or_else(malformed)?;
            let bytes = HVec::from_slice(frame).map_err(|_| malformed())?;

            let accepted = {
                let mut sent = self.sent.lock().unwrap_or_else(PoisonError::into_inner);
                sent.push(SentFrame {
                    bytes,
                    at: Instant::now(),
                });
                sent.len()
            };
            if let Some((count, handle)) = &self.cancel_after {
                if accepted == *count {
                    handle.cancel();
                }
            }
            Ok(())
        }
    }

    impl AccessoryTransport for MockTransport {
        type Error = MockTransportError;

        fn send(
            &self,
            frame: &[u8],
            _cancel: &CancelToken,
        ) -> impl Future<Output = Result<(), Self::Error>> + Send {
            async move {
                if !self.write_latency.is_zero() {
                    tokio::time::sleep(self.write_latency).await;
                }
                self.accept(frame)
            }
        }
    }
}
