// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Pooling of many meters across one or more ports.
//!
//! The pool claims every registered port's receive handler for a single
//! dispatcher and routes each valid reply to the unique meter matching
//! `(port id, slave address)`. One dispatcher per port instead of one per
//! meter keeps the receive side contention-free and meters unaware of
//! anything beyond their transmit contract.
//!
//! ```rust,ignore
//! use emeter_core::Pool;
//! use emeter_bus::SerialConfig;
//! use emeter_proto::MeterModel;
//!
//! let pool = Pool::new();
//! pool.add_serial_port(1, &SerialConfig::default_ac("/dev/ttyUSB0"), "left bus").await?;
//! pool.add_meter(1, 10, 0x0A, MeterModel::AcV3, "heat pump")?;
//! pool.add_meter(1, 11, 0x0B, MeterModel::AcV3, "garage")?;
//!
//! pool.attach_callback(|meter_id, reply| { /* every routed reply */ });
//! pool.autopoll(true);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use emeter_bus::{Port, SerialConfig};
use emeter_proto::{frame, MeterModel, MeterState, Metrics, Reply};

use crate::error::CoreError;
use crate::meter::{Meter, PortAttach, ReplyCallback, POLL_MIN_PERIOD_MS, POLL_PERIOD_MS};

struct PoolEntry {
    port_id: u8,
    meter: Meter,
}

struct PoolInner {
    ports: DashMap<u8, Arc<Port>>,
    meters: DashMap<u8, PoolEntry>,
    /// Serializes registry mutations so the duplicate checks in
    /// `add_meter` cannot race each other. The dispatch path never takes it.
    registry: Mutex<()>,
    callback: Mutex<Option<ReplyCallback>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    poll_period_ms: AtomicU64,
}

/// A set of ports and the meters multiplexed over them.
///
/// Clonable handle; clones share the same registries.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                ports: DashMap::new(),
                meters: DashMap::new(),
                registry: Mutex::new(()),
                callback: Mutex::new(None),
                poller: Mutex::new(None),
                poll_period_ms: AtomicU64::new(POLL_PERIOD_MS),
            }),
        }
    }

    // =========================================================================
    // Ports
    // =========================================================================

    /// Registers a port, claims its receive handler for the pool dispatcher
    /// and starts it.
    pub async fn add_port(&self, port: Port) -> Result<(), CoreError> {
        let id = port.id();
        {
            let _guard = self.inner.registry.lock();
            if self.inner.ports.contains_key(&id) {
                return Err(CoreError::DuplicatePort(id));
            }

            let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
            port.attach_rx_handler(move |reply| {
                if let Some(pool) = weak.upgrade() {
                    pool.dispatch(id, reply);
                }
            });

            self.inner.ports.insert(id, Arc::new(port));
        }

        // Start outside the registry guard; startup is async.
        let port = self.inner.ports.get(&id).map(|p| p.value().clone());
        if let Some(port) = port {
            port.start().await;
        }
        tracing::info!(port = id, "port registered with pool");
        Ok(())
    }

    /// Opens a serial device and registers it as a port.
    pub async fn add_serial_port(
        &self,
        id: u8,
        config: &SerialConfig,
        descr: impl Into<String>,
    ) -> Result<(), CoreError> {
        let port = Port::serial(id, config, descr)?;
        self.add_port(port).await
    }

    /// `true` when a port with this id is registered.
    pub fn contains_port(&self, id: u8) -> bool {
        self.inner.ports.contains_key(&id)
    }

    /// Number of registered ports.
    pub fn port_count(&self) -> usize {
        self.inner.ports.len()
    }

    // =========================================================================
    // Meters
    // =========================================================================

    /// Creates and registers a meter on an existing port.
    ///
    /// Rejected: broadcast, catch-all and out-of-range addresses (a pooled
    /// meter must answer on its own address), duplicate meter ids, unknown
    /// ports, and `(port, address)` pairs already claimed by another meter.
    pub fn add_meter(
        &self,
        port_id: u8,
        meter_id: u8,
        addr: u8,
        model: MeterModel,
        descr: impl Into<String>,
    ) -> Result<Meter, CoreError> {
        if !frame::is_assignable_addr(addr) {
            return Err(CoreError::InvalidAddress { addr });
        }

        let _guard = self.inner.registry.lock();

        let Some(port) = self.inner.ports.get(&port_id).map(|p| p.value().clone()) else {
            return Err(CoreError::PortNotFound(port_id));
        };
        if self.inner.meters.contains_key(&meter_id) {
            return Err(CoreError::DuplicateMeter(meter_id));
        }
        let addr_taken = self
            .inner
            .meters
            .iter()
            .any(|e| e.value().port_id == port_id && e.value().meter.address() == addr);
        if addr_taken {
            return Err(CoreError::AddressInUse { port: port_id, addr });
        }

        let meter = Meter::new(meter_id, model, addr, descr);
        meter.attach_port(port, PortAttach::TxOnly)?;
        self.inner.meters.insert(
            meter_id,
            PoolEntry {
                port_id,
                meter: meter.clone(),
            },
        );

        tracing::info!(
            meter = meter_id,
            port = port_id,
            addr,
            model = %model,
            "meter registered with pool"
        );
        Ok(meter)
    }

    /// Detaches and removes a meter. Returns `false` when the id is unknown.
    pub fn remove_meter(&self, meter_id: u8) -> bool {
        let _guard = self.inner.registry.lock();
        match self.inner.meters.remove(&meter_id) {
            Some((_, entry)) => {
                entry.meter.detach_port();
                tracing::info!(meter = meter_id, "meter removed from pool");
                true
            }
            None => false,
        }
    }

    /// `true` when a meter with this id is registered.
    pub fn contains_meter(&self, id: u8) -> bool {
        self.inner.meters.contains_key(&id)
    }

    /// Number of registered meters.
    pub fn meter_count(&self) -> usize {
        self.inner.meters.len()
    }

    /// Handle to a registered meter.
    pub fn meter(&self, id: u8) -> Option<Meter> {
        self.inner.meters.get(&id).map(|e| e.value().meter.clone())
    }

    /// Copy of a meter's full state.
    pub fn state(&self, id: u8) -> Option<MeterState> {
        self.meter(id).map(|m| m.state())
    }

    /// Copy of a meter's last-known metrics.
    pub fn metrics(&self, id: u8) -> Option<Metrics> {
        self.meter(id).map(|m| m.metrics())
    }

    /// A meter's description.
    pub fn descr(&self, id: u8) -> Option<String> {
        self.meter(id).map(|m| m.descr().to_string())
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Enqueues a metrics poll for every registered meter.
    ///
    /// Each port's arbitration serializes its share of the burst; errors on
    /// individual meters are logged, not propagated, so one full queue does
    /// not starve the rest of the pool.
    pub fn poll_all(&self) {
        for entry in self.inner.meters.iter() {
            if let Err(e) = entry.value().meter.poll() {
                tracing::debug!(meter = *entry.key(), error = %e, "pool poll skipped meter");
            }
        }
    }

    /// Resets the energy counter of one meter.
    pub fn reset_energy(&self, meter_id: u8) -> Result<(), CoreError> {
        match self.meter(meter_id) {
            Some(m) => m.reset_energy(),
            None => Err(CoreError::MeterNotFound(meter_id)),
        }
    }

    /// Attaches the pool-wide reply callback `(meter_id, reply)`.
    ///
    /// Fired after the owning meter parsed the reply, for every reply the
    /// dispatcher routes. Runs on the receive task; must not block.
    pub fn attach_callback(&self, f: impl FnMut(u8, &Reply) + Send + 'static) {
        *self.inner.callback.lock() = Some(Box::new(f));
    }

    /// Removes the pool-wide reply callback.
    pub fn detach_callback(&self) {
        *self.inner.callback.lock() = None;
    }

    // =========================================================================
    // Periodic polling
    // =========================================================================

    /// Starts or stops the pool-wide autopoll timer.
    ///
    /// This is a single timer fanning out [`poll_all`](Self::poll_all); the
    /// per-meter timers are not used by the pool. Returns the resulting
    /// timer state.
    pub fn autopoll(&self, enable: bool) -> bool {
        let mut slot = self.inner.poller.lock();
        if enable {
            if slot.is_some() {
                return true;
            }
            let weak = Arc::downgrade(&self.inner);
            let period = self.inner.poll_period_ms.load(Ordering::Relaxed);
            *slot = Some(tokio::spawn(pool_poll_task(weak, period)));
            tracing::debug!(period, "pool autopoll started");
            true
        } else {
            match slot.take() {
                Some(handle) => {
                    handle.abort();
                    tracing::debug!("pool autopoll stopped");
                    false
                }
                None => false,
            }
        }
    }

    /// `true` while the pool autopoll timer is armed.
    pub fn autopoll_active(&self) -> bool {
        self.inner.poller.lock().is_some()
    }

    /// Current pool autopoll period in milliseconds.
    pub fn pollrate(&self) -> u64 {
        self.inner.poll_period_ms.load(Ordering::Relaxed)
    }

    /// Changes the pool autopoll period, with the same lower bound as the
    /// per-meter rate.
    pub fn set_pollrate(&self, period_ms: u64) -> Result<(), CoreError> {
        if period_ms < POLL_MIN_PERIOD_MS {
            return Err(CoreError::PollRateTooFast {
                period_ms,
                min_ms: POLL_MIN_PERIOD_MS,
            });
        }

        self.inner.poll_period_ms.store(period_ms, Ordering::Relaxed);

        let mut slot = self.inner.poller.lock();
        if let Some(handle) = slot.take() {
            handle.abort();
            let weak = Arc::downgrade(&self.inner);
            *slot = Some(tokio::spawn(pool_poll_task(weak, period_ms)));
        }
        Ok(())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops the poller and gracefully stops every port, draining their
    /// queues. Dropping the pool instead force-stops the ports.
    pub async fn shutdown(&self) {
        self.autopoll(false);

        let ports: Vec<Arc<Port>> = self
            .inner
            .ports
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for port in ports {
            port.stop().await;
        }
        tracing::info!("pool shut down");
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("ports", &self.inner.ports.len())
            .field("meters", &self.inner.meters.len())
            .finish_non_exhaustive()
    }
}

impl PoolInner {
    /// Routes one received frame to the meter matching `(port, address)`.
    ///
    /// Runs on the receive task of the originating port. Invalid frames are
    /// dropped before any lookup; stray frames (no matching meter) are
    /// dropped after it — possibly a reply from a device nobody registered.
    fn dispatch(&self, port_id: u8, reply: &Reply) {
        if !reply.is_valid() {
            tracing::trace!(port = port_id, "dispatcher dropped invalid frame");
            return;
        }

        let addr = reply.slave_addr();
        let mut target: Option<(u8, Meter)> = None;
        for entry in self.meters.iter() {
            if entry.value().port_id == port_id && entry.value().meter.address() == addr {
                target = Some((*entry.key(), entry.value().meter.clone()));
                break;
            }
        }

        match target {
            Some((meter_id, meter)) => {
                meter.ingest(reply);
                if let Some(cb) = self.callback.lock().as_mut() {
                    cb(meter_id, reply);
                }
            }
            None => {
                tracing::trace!(port = port_id, addr, "stray reply, no matching meter");
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

async fn pool_poll_task(pool: Weak<PoolInner>, period_ms: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else { break };
        for entry in inner.meters.iter() {
            if let Err(e) = entry.value().meter.poll() {
                tracing::debug!(meter = *entry.key(), error = %e, "pool autopoll skipped meter");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
