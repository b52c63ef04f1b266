//! Lock-step fan-out of one frame stream to several consumers.
//!
//! ```text
//!                      ┌─► TeeOutput 0 ─► clone of frame k
//! upstream frame k ────┤
//!                      └─► TeeOutput 1 ─► clone of frame k
//! ```
//!
//! Each round reads upstream once, hands every open output its own clone
//! and releases the original. The next round starts only after every open
//! output has taken its clone, so a consumer that is ahead waits for the
//! ones that are behind.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{error::Result, frame::Frame, stage::FrameStream};

struct TeeState {
    slots: Vec<Option<Result<Frame>>>,
    open: Vec<bool>,
    ended: bool,
    rounds: u64,
}

impl TeeState {
    /// Every open output has taken its item from the last round.
    fn round_drained(&self) -> bool {
        self.slots
            .iter()
            .zip(&self.open)
            .all(|(slot, open)| !*open || slot.is_none())
    }
}

struct TeeShared {
    // Held across the upstream read so a round is never read twice.
    upstream: tokio::sync::Mutex<Option<FrameStream>>,
    state: Mutex<TeeState>,
    notify: Notify,
}

/// Splits `input` into `n` lock-stepped outputs.
pub fn tee(input: FrameStream, n: usize) -> Vec<TeeOutput> {
    let shared = Arc::new(TeeShared {
        upstream: tokio::sync::Mutex::new(Some(input)),
        state: Mutex::new(TeeState {
            slots: (0..n).map(|_| None).collect(),
            open: vec![true; n],
            ended: false,
            rounds: 0,
        }),
        notify: Notify::new(),
    });

    (0..n)
        .map(|index| TeeOutput {
            index,
            shared: shared.clone(),
        })
        .collect()
}

pub struct TeeOutput {
    index: usize,
    shared: Arc<TeeShared>,
}

impl TeeOutput {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Upstream reads performed so far, shared by all outputs of this tee.
    pub fn rounds(&self) -> u64 {
        self.shared.state.lock().rounds
    }

    pub async fn next_frame(&mut self) -> Option<Result<Frame>> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let may_read = {
                let mut state = self.shared.state.lock();
                if let Some(item) = state.slots[self.index].take() {
                    drop(state);
                    self.shared.notify.notify_waiters();
                    return Some(item);
                }
                if state.ended {
                    return None;
                }
                state.round_drained()
            };

            if may_read {
                self.read_round().await;
                continue;
            }
            notified.await;
        }
    }

    async fn read_round(&self) {
        let mut upstream = self.shared.upstream.lock().await;

        // Another output may have read this round while we waited for the lock.
        {
            let state = self.shared.state.lock();
            if state.ended || !state.round_drained() {
                return;
            }
        }

        let next = match upstream.as_mut() {
            Some(stream) => stream.next().await,
            None => None,
        };

        let mut state = self.shared.state.lock();
        match next {
            Some(Ok(frame)) => {
                state.rounds += 1;
                for index in 0..state.slots.len() {
                    if state.open[index] {
                        state.slots[index] = Some(Ok(frame.clone()));
                    }
                }
                frame.release();
            }
            Some(Err(e)) => {
                log::error!("tee: upstream failed: {}", e);
                for index in 0..state.slots.len() {
                    if state.open[index] {
                        state.slots[index] = Some(Err(e.clone()));
                    }
                }
                state.ended = true;
                upstream.take();
            }
            None => {
                log::debug!("tee: upstream ended after {} rounds", state.rounds);
                state.ended = true;
                upstream.take();
            }
        }
        drop(state);
        drop(upstream);
        self.shared.notify.notify_waiters();
    }

    pub fn into_stream(self) -> FrameStream {
        Box::pin(futures::stream::unfold(self, |mut output| async move {
            output.next_frame().await.map(|item| (item, output))
        }))
    }
}

impl Drop for TeeOutput {
    fn drop(&mut self) {
        let all_closed = {
            let mut state = self.shared.state.lock();
            state.open[self.index] = false;
            // Releases a clone this output never took.
            state.slots[self.index] = None;
            state.open.iter().all(|open| !*open)
        };
        if all_closed {
            if let Ok(mut upstream) = self.shared.upstream.try_lock() {
                upstream.take();
            }
        }
        self.shared.notify.notify_waiters();
    }
}

#[cfg(test)]
#[path = "tee_test.rs"]
mod tee_test;
