use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::PollerConfig;
use crate::engine::logic;
use crate::engine::PumpState;
use crate::error::Result;
use crate::pts::codec::{PacketOutcome, ResponseEnvelope};
use crate::pts::command::DeviceCommand;
use crate::pts::PtsApi;
use crate::runtime::StationHub;

/// Running totals since the poller was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub skipped_ticks: u64,
    pub hard_packet_errors: u64,
    pub not_configured_packets: u64,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub tick: u64,
    pub pumps_updated: usize,
    pub class_changes: usize,
    pub transactions_fetched: usize,
    pub tanks_updated: usize,
    pub hard_errors: usize,
    pub not_configured: usize,
    pub elapsed: Duration,
}

impl CycleReport {
    fn count(&mut self, response: &ResponseEnvelope) {
        let (hard, benign) = response.error_counts();
        self.hard_errors += hard;
        self.not_configured += benign;
    }
}

struct PollerInner<C> {
    client: Arc<C>,
    hub: Arc<StationHub>,
    config: PollerConfig,
    stats: Mutex<PollStats>,
    cycle: Mutex<Option<JoinHandle<()>>>,
}

/// Periodic status poller.
///
/// Each tick runs at most one cycle; a tick that arrives while the previous
/// cycle is still waiting on the controller is counted and skipped.
pub struct Poller<C: PtsApi + 'static> {
    inner: Arc<PollerInner<C>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: PtsApi + 'static> Poller<C> {
    pub fn new(client: Arc<C>, hub: Arc<StationHub>, config: PollerConfig) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                client,
                hub,
                config,
                stats: Mutex::new(PollStats::default()),
                cycle: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    /// Starts the timer. Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            log::warn!("[POLLER] already running");
            return false;
        }

        log::info!(
            "[POLLER] starting: every {:?}, pumps {:?}, probes {:?} every {} ticks",
            self.inner.config.interval,
            self.inner.config.pumps,
            self.inner.config.probes,
            self.inner.config.tank_every_ticks()
        );
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.run().await }));
        true
    }

    /// Stops the timer and any cycle in flight. Returns `false` if not running.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.task.lock().take() else {
            return false;
        };
        handle.abort();
        if let Some(cycle) = self.inner.cycle.lock().take() {
            cycle.abort();
        }
        log::info!("[POLLER] stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> PollStats {
        self.inner.stats.lock().clone()
    }

    /// One cycle; errors are returned to the caller.
    pub async fn poll_cycle(&self, tick: u64) -> Result<CycleReport> {
        self.inner.poll_cycle(tick).await
    }

    /// One cycle as the timer runs it: errors are logged and counted.
    pub async fn run_cycle(&self, tick: u64) {
        self.inner.run_cycle(tick).await
    }
}

impl<C: PtsApi + 'static> Drop for Poller<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: PtsApi + 'static> PollerInner<C> {
    async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick: u64 = 0;

        loop {
            interval.tick().await;
            let current = tick;
            tick = tick.wrapping_add(1);

            let mut cycle = self.cycle.lock();
            if cycle.as_ref().is_some_and(|h| !h.is_finished()) {
                self.stats.lock().skipped_ticks += 1;
                log::debug!("[POLLER] tick {} skipped, previous cycle still running", current);
                continue;
            }

            let inner = self.clone();
            *cycle = Some(tokio::spawn(async move { inner.run_cycle(current).await }));
        }
    }

    async fn run_cycle(&self, tick: u64) {
        let result = self.poll_cycle(tick).await;

        let mut stats = self.stats.lock();
        stats.cycles += 1;
        match result {
            Ok(report) => {
                stats.hard_packet_errors += report.hard_errors as u64;
                stats.not_configured_packets += report.not_configured as u64;
                log::trace!("[POLLER] tick {} done in {:?}", tick, report.elapsed);
            }
            Err(e) if e.is_fatal() => {
                stats.failed_cycles += 1;
                log::error!("[POLLER] tick {} failed: {}", tick, e);
            }
            Err(e) => {
                stats.failed_cycles += 1;
                log::warn!("[POLLER] tick {} failed: {}", tick, e);
            }
        }
    }

    async fn poll_cycle(&self, tick: u64) -> Result<CycleReport> {
        let started = Instant::now();
        let mut report = CycleReport {
            tick,
            ..CycleReport::default()
        };

        if !self.config.pumps.is_empty() {
            let ended = self.poll_pumps(&mut report).await?;
            if !ended.is_empty() {
                self.fetch_transactions(&ended, &mut report).await?;
            }
        }

        if !self.config.probes.is_empty() && tick % self.config.tank_every_ticks() == 0 {
            self.poll_tanks(&mut report).await?;
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Returns the pumps that just entered end-of-transaction.
    async fn poll_pumps(&self, report: &mut CycleReport) -> Result<Vec<u32>> {
        let pumps = &self.config.pumps;
        let commands: Vec<DeviceCommand> = pumps
            .iter()
            .map(|&pump| DeviceCommand::PumpGetStatus { pump })
            .collect();
        let response = self.client.execute(&commands).await?;
        report.count(&response);

        let mut ended = Vec::new();
        for (id, &pump) in (1u32..).zip(pumps.iter()) {
            let Some(packet) = response.packet(id) else {
                log::debug!("[POLLER] no status packet for pump {}", pump);
                continue;
            };
            let PacketOutcome::Success(data) = packet.outcome() else {
                continue;
            };
            let Some(status) = logic::pump_status_from_packet(&packet.kind, data, Some(pump)) else {
                log::debug!("[POLLER] pump {} answered with {}", pump, packet.kind);
                continue;
            };

            let transition = self.hub.apply_pump_status(status);
            report.pumps_updated += 1;
            if transition.entered.is_some() {
                report.class_changes += 1;
            }
            if transition.entered == Some(PumpState::EndOfTransaction) {
                ended.push(pump);
            }
        }
        Ok(ended)
    }

    async fn fetch_transactions(&self, pumps: &[u32], report: &mut CycleReport) -> Result<()> {
        log::debug!("[POLLER] fetching transaction details for pumps {:?}", pumps);
        let commands: Vec<DeviceCommand> = pumps
            .iter()
            .map(|&pump| DeviceCommand::PumpGetTransactionInformation { pump })
            .collect();
        let response = self.client.execute(&commands).await?;
        report.count(&response);

        for (id, &pump) in (1u32..).zip(pumps.iter()) {
            let Some(PacketOutcome::Success(data)) = response.packet(id).map(|p| p.outcome()) else {
                continue;
            };
            if let Some(tx) = logic::transaction_report(data, Some(pump)) {
                self.hub
                    .apply_transaction_report(&tx, data.cloned().unwrap_or(Value::Null));
                report.transactions_fetched += 1;
            }
        }
        Ok(())
    }

    async fn poll_tanks(&self, report: &mut CycleReport) -> Result<()> {
        let probes = &self.config.probes;
        let commands: Vec<DeviceCommand> = probes
            .iter()
            .map(|&probe| DeviceCommand::ProbeGetMeasurements { probe })
            .collect();
        let response = self.client.execute(&commands).await?;
        report.count(&response);

        for (id, &probe) in (1u32..).zip(probes.iter()) {
            let Some(PacketOutcome::Success(data)) = response.packet(id).map(|p| p.outcome()) else {
                continue;
            };
            if let Some(tank) = logic::tank_status_from_packet(data, Some(probe)) {
                self.hub.apply_tank_status(tank);
                report.tanks_updated += 1;
            }
        }
        Ok(())
    }
}
