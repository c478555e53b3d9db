//! # Ordered Audio Playback Queue
//!
//! Synthesized audio arrives as arbitrarily sized fragments, each of which
//! needs an asynchronous decode and an asynchronous playback-completion
//! signal, and fragments can arrive much faster than they play. This queue
//! serializes them so they play strictly in arrival order.
//!
//! ## Invariants:
//! - At most one fragment is actively playing.
//! - The next fragment dequeued is always the oldest enqueued (FIFO).
//! - The queue reports "not speaking" only after the currently playing
//!   fragment finishes (or a reset discards it).
//! - `reset` drops all pending fragments and stops the current one without
//!   emitting further side effects for the discarded fragments.
//!
//! ## Side channel:
//! While a fragment plays, a volume sample is derived from the signal every
//! ~50ms and published for lip-sync/visualization. The instant nothing is
//! playing the reported volume drops to zero.

use crate::audio::codec;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, warn};

/// How often volume samples are published while a fragment plays.
pub const VOLUME_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// Where decoded audio actually goes (a device, a test recorder).
///
/// `play` resolves when the fragment has finished playing. Implementations
/// must stop output when the returned future is dropped — that is how `reset`
/// cuts off the fragment that is currently playing.
#[async_trait]
pub trait AudioSink: Send + 'static {
    async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), String>;
}

enum Command {
    Enqueue(Vec<u8>),
    Reset,
}

/// Handle for feeding the queue. Dropping it stops the worker after the
/// current fragment (pending ones are discarded).
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<Command>,
}

/// Read side of the queue's presentation feedback.
#[derive(Clone)]
pub struct PlaybackMonitor {
    /// Live volume in 0.0..1.0; exactly 0.0 whenever nothing is playing
    pub volume: watch::Receiver<f32>,
    /// Whether a fragment is currently playing
    pub speaking: watch::Receiver<bool>,
}

impl PlaybackQueue {
    /// Spawn the playback worker over the given sink.
    ///
    /// `sample_rate` is the rate of the 16-bit little-endian PCM fragments
    /// that will be enqueued.
    pub fn start<S: AudioSink>(sink: S, sample_rate: u32) -> (Self, PlaybackMonitor) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (volume_tx, volume_rx) = watch::channel(0.0_f32);
        let (speaking_tx, speaking_rx) = watch::channel(false);

        tokio::spawn(run_worker(sink, sample_rate, rx, volume_tx, speaking_tx));

        (
            Self { tx },
            PlaybackMonitor {
                volume: volume_rx,
                speaking: speaking_rx,
            },
        )
    }

    /// Append a raw PCM fragment at the tail. If nothing is playing, playback
    /// begins immediately; otherwise the fragment waits its turn.
    pub fn enqueue(&self, fragment: Vec<u8>) {
        let _ = self.tx.send(Command::Enqueue(fragment));
    }

    /// Discard all pending fragments and stop the current one. Used when
    /// switching backend modes.
    pub fn reset(&self) {
        let _ = self.tx.send(Command::Reset);
    }
}

async fn run_worker<S: AudioSink>(
    mut sink: S,
    sample_rate: u32,
    mut rx: mpsc::UnboundedReceiver<Command>,
    volume: watch::Sender<f32>,
    speaking: watch::Sender<bool>,
) {
    let mut pending: VecDeque<Vec<u8>> = VecDeque::new();

    loop {
        // Idle: wait for the first fragment.
        while pending.is_empty() {
            match rx.recv().await {
                Some(Command::Enqueue(fragment)) => pending.push_back(fragment),
                Some(Command::Reset) => {} // nothing queued, nothing playing
                None => return,
            }
        }

        let _ = speaking.send(true);

        'playing: while let Some(fragment) = pending.pop_front() {
            let play = play_fragment(&mut sink, fragment, sample_rate, &volume);
            tokio::pin!(play);

            loop {
                tokio::select! {
                    result = &mut play => {
                        if let Err(err) = result {
                            warn!("Audio sink failed, dropping fragment: {}", err);
                        }
                        break;
                    }
                    cmd = rx.recv() => match cmd {
                        Some(Command::Enqueue(fragment)) => pending.push_back(fragment),
                        Some(Command::Reset) => {
                            // Dropping `play` stops the sink mid-fragment; the
                            // discarded fragments get no completion side effects.
                            debug!("Playback queue reset, discarding {} pending fragments", pending.len());
                            pending.clear();
                            break 'playing;
                        }
                        None => {
                            pending.clear();
                            break 'playing;
                        }
                    }
                }
            }
        }

        // Queue drained or reset: report silence the instant playback stops.
        let _ = volume.send(0.0);
        let _ = speaking.send(false);

        if rx.is_closed() {
            return;
        }
    }
}

/// Decode one fragment and play it, publishing a volume sample every
/// [`VOLUME_SAMPLE_INTERVAL`] derived from the signal at the current
/// playback position.
async fn play_fragment<S: AudioSink>(
    sink: &mut S,
    fragment: Vec<u8>,
    sample_rate: u32,
    volume: &watch::Sender<f32>,
) -> Result<(), String> {
    let samples = codec::pcm16_to_float(&codec::bytes_to_pcm16(&fragment)?);
    if samples.is_empty() {
        return Ok(());
    }

    let window = (sample_rate as u64 * VOLUME_SAMPLE_INTERVAL.as_millis() as u64 / 1000) as usize;
    let started = Instant::now();

    let play = sink.play(&samples, sample_rate);
    tokio::pin!(play);

    let mut ticker = time::interval(VOLUME_SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = &mut play => return result,
            _ = ticker.tick() => {
                let position = (started.elapsed().as_secs_f64() * sample_rate as f64) as usize;
                let start = position.min(samples.len());
                let end = (start + window.max(1)).min(samples.len());
                let _ = volume.send(codec::rms_volume(&samples[start..end]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::pcm16_to_bytes;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    /// Sink that records the first sample of each played fragment and takes
    /// realistic (virtual) time to play, asserting single-occupancy.
    struct RecordingSink {
        played: Arc<Mutex<Vec<f32>>>,
        active: Arc<AtomicBool>,
    }

    /// Clears the occupancy flag even when playback is cancelled mid-fragment.
    struct ActiveGuard(Arc<AtomicBool>);

    impl Drop for ActiveGuard {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AudioSink for RecordingSink {
        async fn play(&mut self, samples: &[f32], sample_rate: u32) -> Result<(), String> {
            assert!(
                !self.active.swap(true, Ordering::SeqCst),
                "two fragments playing at once"
            );
            let _guard = ActiveGuard(self.active.clone());
            let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate as f64);
            time::sleep(duration).await;
            self.played.lock().unwrap().push(samples[0]);
            Ok(())
        }
    }

    fn fragment(level: i16, samples: usize) -> Vec<u8> {
        pcm16_to_bytes(&vec![level; samples])
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        time::timeout(Duration::from_secs(30), async {
            while !condition() {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fragments_play_in_enqueue_order_then_idle() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            played: played.clone(),
            active: Arc::new(AtomicBool::new(false)),
        };
        let (queue, monitor) = PlaybackQueue::start(sink, 16_000);

        // Three 100ms fragments, enqueued back to back (faster than they play).
        queue.enqueue(fragment(1000, 1600));
        queue.enqueue(fragment(2000, 1600));
        queue.enqueue(fragment(3000, 1600));

        let mut speaking = monitor.speaking.clone();
        wait_until(|| *speaking.borrow_and_update()).await;

        let played_for_wait = played.clone();
        wait_until(move || played_for_wait.lock().unwrap().len() == 3).await;
        wait_until(|| !*speaking.borrow_and_update()).await;

        let order: Vec<f32> = played.lock().unwrap().clone();
        assert!(order[0] < order[1] && order[1] < order[2], "fragments out of order: {:?}", order);

        // Idle means silence.
        assert_eq!(*monitor.volume.borrow(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_is_nonzero_while_playing() {
        let sink = RecordingSink {
            played: Arc::new(Mutex::new(Vec::new())),
            active: Arc::new(AtomicBool::new(false)),
        };
        let (queue, monitor) = PlaybackQueue::start(sink, 16_000);

        // One second of loud audio.
        queue.enqueue(fragment(16_000, 16_000));

        let mut speaking = monitor.speaking.clone();
        wait_until(|| *speaking.borrow_and_update()).await;

        // Let a few sampling intervals elapse mid-fragment.
        time::sleep(Duration::from_millis(200)).await;
        assert!(*monitor.volume.borrow() > 0.0);

        wait_until(|| !*speaking.borrow_and_update()).await;
        assert_eq!(*monitor.volume.borrow(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_pending_and_stops_current() {
        let played = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            played: played.clone(),
            active: Arc::new(AtomicBool::new(false)),
        };
        let (queue, monitor) = PlaybackQueue::start(sink, 16_000);

        // Two one-second fragments, then reset while the first still plays.
        queue.enqueue(fragment(1000, 16_000));
        queue.enqueue(fragment(2000, 16_000));

        let mut speaking = monitor.speaking.clone();
        wait_until(|| *speaking.borrow_and_update()).await;
        queue.reset();

        wait_until(|| !*speaking.borrow_and_update()).await;

        // Neither fragment reached completion: the first was cut off, the
        // second never started.
        assert!(played.lock().unwrap().is_empty());
        assert_eq!(*monitor.volume.borrow(), 0.0);

        // The queue still accepts new fragments after a reset.
        queue.enqueue(fragment(3000, 1600));
        let played_for_wait = played.clone();
        wait_until(move || played_for_wait.lock().unwrap().len() == 1).await;
    }
}
