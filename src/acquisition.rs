//! # Acquisition Loop
//!
//! Periodic sampling of every channel into the statistics engine.
//!
//! This module handles:
//! - Reading each configured channel once per cycle
//! - Publishing channel values and the derived consumption figures
//! - Keeping the cycle period at `sample_every` seconds
//! - Stopping promptly when asked, even in the middle of a cycle
//! - Restarting the acquisition thread when it dies

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::adc::RawSampler;
use crate::channel::AnalogChannel;
use crate::error::Result;
use crate::publish::{Measurement, MessageDispatcher};
use crate::stats::EnergyStatistics;

/// Name of the published whole-house power measurement
pub const LIVE_CONSUMPTION: &str = "live_consumption";

/// Name of the published energy-so-far-today measurement
pub const DAILY_CONSUMPTION: &str = "daily_consumption";

/// Shared stop flag with an interruptible wait
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag and wake every waiter
    pub fn set(&self) {
        let (lock, condvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        condvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for the flag
    ///
    /// # Returns
    ///
    /// * `true` - The flag is set
    /// * `false` - The timeout elapsed first
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.inner;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// Reads all channels on a fixed period and records the results
pub struct Sampler<S> {
    sampler: S,
    channels: Vec<AnalogChannel>,
    stats: Arc<EnergyStatistics>,
    dispatcher: Arc<MessageDispatcher>,
    period: Duration,
}

impl<S: RawSampler> Sampler<S> {
    /// Create the loop; the period is the engine's sample interval
    pub fn new(
        sampler: S,
        channels: Vec<AnalogChannel>,
        stats: Arc<EnergyStatistics>,
        dispatcher: Arc<MessageDispatcher>,
    ) -> Self {
        let period = Duration::from_secs(u64::from(stats.sample_every()));
        Self {
            sampler,
            channels,
            stats,
            dispatcher,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Read every channel once and record the reading set
    ///
    /// A channel that fails to convert is logged and left out of the set.
    ///
    /// # Returns
    ///
    /// * `false` - Stopped before all channels were read; nothing was recorded
    pub fn run_cycle(&mut self, stop: &StopSignal) -> bool {
        let mut reading = HashMap::with_capacity(self.channels.len());

        for model in &self.channels {
            if stop.is_set() {
                return false;
            }

            let channel = model.channel();
            match model.read(&mut self.sampler) {
                Ok(value) => {
                    self.dispatcher
                        .dispatch(&Measurement::new(channel.name(), value, channel.unit()));
                    reading.insert(channel.clone(), value);
                }
                Err(e) => warn!("Skipping {} this cycle: {}", channel, e),
            }
        }

        if let Err(e) = self.stats.add_reading(&reading) {
            error!("Failed to record reading: {}", e);
            return true;
        }

        match self.stats.live_power(None) {
            Ok(watts) => self.dispatcher.dispatch(&Measurement::new(LIVE_CONSUMPTION, watts, "W")),
            Err(e) => warn!("No live consumption: {}", e),
        }
        match self.stats.daily_power(None) {
            Ok(watt_hours) => {
                self.dispatcher
                    .dispatch(&Measurement::new(DAILY_CONSUMPTION, watt_hours, "Wh"))
            }
            Err(e) => warn!("No daily consumption: {}", e),
        }

        true
    }

    /// Run cycles until `stop` is set
    pub fn run(&mut self, stop: &StopSignal) {
        info!(
            "Sampling {} channels every {}s",
            self.channels.len(),
            self.period.as_secs()
        );

        while !stop.is_set() {
            let started = Instant::now();
            if !self.run_cycle(stop) {
                break;
            }

            let elapsed = started.elapsed();
            info!("Sample cycle finished in {:.3}s", elapsed.as_secs_f64());

            match self.period.checked_sub(elapsed) {
                Some(rest) => {
                    debug!("Next cycle in {:.3}s", rest.as_secs_f64());
                    if stop.wait_timeout(rest) {
                        break;
                    }
                }
                None => warn!(
                    "Sample cycle took {:.3}s, longer than the {}s interval",
                    elapsed.as_secs_f64(),
                    self.period.as_secs()
                ),
            }
        }

        info!("Acquisition stopped");
    }
}

type SpawnFn = Box<dyn FnMut() -> Result<JoinHandle<()>> + Send>;

/// Keeps one acquisition thread alive
///
/// The spawn function builds a fresh [`Sampler`] and starts it on a new
/// thread. It runs again whenever the thread exits without being asked to.
pub struct Supervisor {
    spawn: SpawnFn,
    worker: Option<JoinHandle<()>>,
    restarts: usize,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("running", &self.is_running())
            .field("restarts", &self.restarts)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Start the first worker
    ///
    /// # Errors
    ///
    /// Returns error if `spawn` fails
    pub fn start<F>(spawn: F) -> Result<Self>
    where
        F: FnMut() -> Result<JoinHandle<()>> + Send + 'static,
    {
        let mut spawn: SpawnFn = Box::new(spawn);
        let worker = spawn()?;
        Ok(Self {
            spawn,
            worker: Some(worker),
            restarts: 0,
        })
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Number of times the worker was restarted
    pub fn restarts(&self) -> usize {
        self.restarts
    }

    /// Restart the worker if it exited while `stop` is clear
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - A new worker was started
    /// * `Ok(false)` - The worker is alive or shutdown was requested
    ///
    /// # Errors
    ///
    /// Returns error if the new worker cannot be spawned. The next call
    /// tries again.
    pub fn check(&mut self, stop: &StopSignal) -> Result<bool> {
        if self.is_running() || stop.is_set() {
            return Ok(false);
        }

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(()) => error!("Acquisition thread exited unexpectedly, restarting"),
                Err(_) => error!("Acquisition thread panicked, restarting"),
            }
        }

        self.worker = Some((self.spawn)()?);
        self.restarts += 1;
        Ok(true)
    }

    /// Wait for the current worker to finish
    pub fn join(mut self) -> thread::Result<()> {
        self.worker.take().map_or(Ok(()), JoinHandle::join)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::{BitDepth, Gain};
    use crate::channel::{Aggregator, CalibrationLine, Channel, ChannelKind};
    use crate::error::MeterError;
    use crate::publish::{MessageTemplate, Publisher};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed raw value per input, times out on unknown inputs
    struct FakeSampler {
        values: HashMap<u8, i32>,
        reads: usize,
    }

    impl RawSampler for FakeSampler {
        fn configure(&mut self, _bit_depth: BitDepth, _gain: Gain) -> Result<()> {
            Ok(())
        }

        fn read_raw(&mut self, channel: u8) -> Result<i32> {
            self.reads += 1;
            self.values.get(&channel).copied().ok_or(MeterError::ConversionTimeout {
                channel,
                waited: Duration::from_millis(26),
            })
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        messages: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl RecordingPublisher {
        fn topics(&self) -> Vec<String> {
            self.messages.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
        }

        fn payload_of(&self, topic: &str) -> Option<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .find(|(t, _)| t == topic)
                .map(|(_, p)| p.clone())
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: &str) -> Result<()> {
            self.messages.lock().unwrap().push((topic.to_string(), payload.to_string()));
            Ok(())
        }
    }

    fn model(name: &str, index: u8, kind: ChannelKind, unit: &str) -> AnalogChannel {
        let channel = Channel::new(name, index, BitDepth::Bits12, Gain::X1, kind, unit);
        AnalogChannel::new(channel, CalibrationLine::identity(), 1, Aggregator::Average).unwrap()
    }

    fn setup(values: &[(u8, i32)]) -> (Sampler<FakeSampler>, RecordingPublisher, Arc<EnergyStatistics>) {
        let channels = vec![
            model("L1", 1, ChannelKind::PhaseCurrent, "A"),
            model("mains", 2, ChannelKind::Voltage, "V"),
        ];
        let identities = channels.iter().map(|c| c.channel().clone()).collect();
        let stats = Arc::new(EnergyStatistics::new(identities, 1).unwrap());

        let publisher = RecordingPublisher::default();
        let dispatcher = Arc::new(MessageDispatcher::new(
            vec![MessageTemplate {
                topic: "{name}".to_string(),
                payload: "{value}".to_string(),
            }],
            Box::new(publisher.clone()),
        ));

        let fake = FakeSampler {
            values: values.iter().copied().collect(),
            reads: 0,
        };
        let sampler = Sampler::new(fake, channels, Arc::clone(&stats), dispatcher);
        (sampler, publisher, stats)
    }

    #[test]
    fn test_cycle_records_and_publishes() {
        let (mut sampler, publisher, stats) = setup(&[(1, 2), (2, 230)]);
        assert_eq!(sampler.period(), Duration::from_secs(1));

        assert!(sampler.run_cycle(&StopSignal::new()));

        assert_eq!(stats.live_power(None).unwrap(), 460.0);
        assert_eq!(
            publisher.topics(),
            vec!["L1", "mains", LIVE_CONSUMPTION, DAILY_CONSUMPTION]
        );
        assert_eq!(publisher.payload_of("L1").as_deref(), Some("2"));
        assert_eq!(publisher.payload_of(LIVE_CONSUMPTION).as_deref(), Some("460"));
    }

    #[test]
    fn test_failed_channel_is_skipped() {
        // The voltage input never converts
        let (mut sampler, publisher, stats) = setup(&[(1, 2)]);

        assert!(sampler.run_cycle(&StopSignal::new()));

        assert!(stats.live_voltage().is_nan());
        assert!(stats.live_power(None).unwrap().is_nan());
        assert_eq!(publisher.topics(), vec!["L1", LIVE_CONSUMPTION, DAILY_CONSUMPTION]);
    }

    #[test]
    fn test_stopped_cycle_records_nothing() {
        let (mut sampler, publisher, stats) = setup(&[(1, 2), (2, 230)]);
        let stop = StopSignal::new();
        stop.set();

        assert!(!sampler.run_cycle(&stop));
        assert_eq!(sampler.sampler.reads, 0);
        assert!(publisher.topics().is_empty());
        assert!(stats.live_voltage().is_nan());
    }

    #[test]
    fn test_run_stops_during_wait() {
        let (mut sampler, publisher, _stats) = setup(&[(1, 2), (2, 230)]);
        let stop = StopSignal::new();

        let handle = {
            let stop = stop.clone();
            thread::spawn(move || {
                sampler.run(&stop);
                sampler
            })
        };

        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        stop.set();
        let sampler = handle.join().unwrap();

        // The one second wait was interrupted
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(sampler.sampler.reads >= 2);
        assert!(publisher.topics().contains(&LIVE_CONSUMPTION.to_string()));
    }

    #[test]
    fn test_stop_signal_wait() {
        let stop = StopSignal::new();
        assert!(!stop.is_set());
        assert!(!stop.wait_timeout(Duration::from_millis(10)));

        let waiter = {
            let stop = stop.clone();
            thread::spawn(move || stop.wait_timeout(Duration::from_secs(10)))
        };
        stop.set();
        assert!(waiter.join().unwrap());
        assert!(stop.is_set());
    }

    fn wait_for_exit(supervisor: &Supervisor) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while supervisor.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!supervisor.is_running());
    }

    /// Spawn function whose workers return at once, counting spawns
    fn short_lived(spawned: Arc<AtomicUsize>) -> impl FnMut() -> Result<JoinHandle<()>> + Send + 'static {
        move || {
            spawned.fetch_add(1, Ordering::SeqCst);
            Ok(thread::spawn(|| {}))
        }
    }

    #[test]
    fn test_supervisor_restarts_exited_worker() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let stop = StopSignal::new();
        let mut supervisor = Supervisor::start(short_lived(Arc::clone(&spawned))).unwrap();
        assert_eq!(spawned.load(Ordering::SeqCst), 1);

        wait_for_exit(&supervisor);
        assert!(supervisor.check(&stop).unwrap());
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.restarts(), 1);

        stop.set();
        assert!(supervisor.join().is_ok());
    }

    #[test]
    fn test_supervisor_restarts_panicked_worker() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let stop = StopSignal::new();
        let mut supervisor = {
            let spawned = Arc::clone(&spawned);
            Supervisor::start(move || {
                let first = spawned.fetch_add(1, Ordering::SeqCst) == 0;
                Ok(thread::spawn(move || {
                    if first {
                        panic!("bus went away");
                    }
                }))
            })
            .unwrap()
        };

        wait_for_exit(&supervisor);
        assert!(supervisor.check(&stop).unwrap());
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
        assert!(supervisor.join().is_ok());
    }

    #[test]
    fn test_supervisor_leaves_running_or_stopped_worker() {
        let stop = StopSignal::new();
        let mut supervisor = {
            let stop = stop.clone();
            Supervisor::start(move || {
                let stop = stop.clone();
                Ok(thread::spawn(move || {
                    stop.wait_timeout(Duration::from_secs(10));
                }))
            })
            .unwrap()
        };

        assert!(!supervisor.check(&stop).unwrap());

        stop.set();
        wait_for_exit(&supervisor);
        assert!(!supervisor.check(&stop).unwrap());
        assert_eq!(supervisor.restarts(), 0);
        assert!(supervisor.join().is_ok());
    }

    #[test]
    fn test_supervisor_retries_failed_spawn() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let stop = StopSignal::new();
        let mut supervisor = {
            let attempts = Arc::clone(&attempts);
            Supervisor::start(move || {
                match attempts.fetch_add(1, Ordering::SeqCst) {
                    1 => Err(MeterError::Bus("device busy".to_string())),
                    _ => Ok(thread::spawn(|| {})),
                }
            })
            .unwrap()
        };

        wait_for_exit(&supervisor);
        assert!(matches!(supervisor.check(&stop), Err(MeterError::Bus(_))));
        assert!(supervisor.check(&stop).unwrap());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(supervisor.join().is_ok());
    }
}
