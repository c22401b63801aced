// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One logical meter on a bus.
//!
//! [`Meter`] is a cheap clonable handle: the shared inner state holds the
//! model tag, the slave address and the last-known readings. The receive
//! path mutates that state; user tasks read consistent copies out.
//!
//! A meter either owns its port's receive handler
//! ([`PortAttach::Exclusive`], single-device buses and provisioning) or
//! shares the port transmit-only ([`PortAttach::TxOnly`], pool membership,
//! where the pool's dispatcher feeds the meter instead).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use emeter_bus::Port;
use emeter_proto::{ac, dc, frame, MeterModel, MeterState, Metrics, Reply, Request, Shunt};

use crate::clock;
use crate::error::CoreError;

/// Default autopoll period. The meters refresh their internal registers
/// about once per second, so polling faster only re-reads the same values.
pub const POLL_PERIOD_MS: u64 = 1000;

/// Minimum accepted autopoll period: twice the reply timeout, so a dead bus
/// cannot accumulate a backlog of queued polls.
pub const POLL_MIN_PERIOD_MS: u64 = 2 * emeter_bus::REPLY_TIMEOUT.as_millis() as u64;

/// Callback fired for every reply delivered to a meter (or pool), with the
/// owning meter id. Runs on the receive task; must not block.
pub type ReplyCallback = Box<dyn FnMut(u8, &Reply) + Send>;

/// How a meter binds to a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortAttach {
    /// Claim the port's receive handler. The port serves this meter alone.
    Exclusive,
    /// Share the port as a transmit sink only. Somebody else (a pool
    /// dispatcher) routes replies.
    TxOnly,
}

struct PortBinding {
    port: Arc<Port>,
    exclusive: bool,
}

pub(crate) struct MeterInner {
    id: u8,
    descr: String,
    state: RwLock<MeterState>,
    binding: Mutex<Option<PortBinding>>,
    callback: Mutex<Option<ReplyCallback>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    poll_period_ms: AtomicU64,
}

/// Handle to one meter. Clones share the same device state.
#[derive(Clone)]
pub struct Meter {
    inner: Arc<MeterInner>,
}

impl Meter {
    /// Creates a detached meter.
    ///
    /// `addr` may be the catch-all address for provisioning a solitary
    /// device; pools will refuse it. An empty description defaults to
    /// `meter-{id}`.
    pub fn new(id: u8, model: MeterModel, addr: u8, descr: impl Into<String>) -> Self {
        let descr = descr.into();
        let descr = if descr.is_empty() {
            format!("meter-{id}")
        } else {
            descr
        };

        Self {
            inner: Arc::new(MeterInner {
                id,
                descr,
                state: RwLock::new(MeterState::new(model, addr)),
                binding: Mutex::new(None),
                callback: Mutex::new(None),
                poller: Mutex::new(None),
                poll_period_ms: AtomicU64::new(POLL_PERIOD_MS),
            }),
        }
    }

    // =========================================================================
    // Identity and state access
    // =========================================================================

    /// Meter id, unique within a pool.
    #[inline]
    pub fn id(&self) -> u8 {
        self.inner.id
    }

    /// Mnemonic description.
    #[inline]
    pub fn descr(&self) -> &str {
        &self.inner.descr
    }

    /// Model tag.
    pub fn model(&self) -> MeterModel {
        self.inner.state.read().model
    }

    /// Currently configured slave address.
    pub fn address(&self) -> u8 {
        self.inner.state.read().addr
    }

    /// A consistent copy of the full device state.
    pub fn state(&self) -> MeterState {
        self.inner.state.read().clone()
    }

    /// A copy of the last-known metrics.
    pub fn metrics(&self) -> Metrics {
        self.inner.state.read().metrics
    }

    /// `true` when no good reply arrived within two refresh periods.
    pub fn is_stale(&self) -> bool {
        self.inner.state.read().is_stale(clock::monotonic_us())
    }

    // =========================================================================
    // Port binding
    // =========================================================================

    /// Binds the meter to a port.
    ///
    /// With [`PortAttach::Exclusive`] the port's receive handler is claimed
    /// for this meter; the handler holds only a weak reference, so dropping
    /// every `Meter` clone severs the path cleanly.
    pub fn attach_port(&self, port: Arc<Port>, mode: PortAttach) -> Result<(), CoreError> {
        let mut binding = self.inner.binding.lock();
        if binding.is_some() {
            return Err(CoreError::AlreadyAttached { meter: self.inner.id });
        }

        let exclusive = mode == PortAttach::Exclusive;
        if exclusive {
            let weak: Weak<MeterInner> = Arc::downgrade(&self.inner);
            port.attach_rx_handler(move |reply| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_reply(reply);
                }
            });
        }

        tracing::debug!(
            meter = self.inner.id,
            port = port.id(),
            ?mode,
            "meter attached to port"
        );
        *binding = Some(PortBinding { port, exclusive });
        Ok(())
    }

    /// Unbinds the meter, releasing the receive handler if it was claimed.
    pub fn detach_port(&self) {
        let mut binding = self.inner.binding.lock();
        if let Some(b) = binding.take() {
            if b.exclusive {
                b.port.detach_rx_handler();
            }
            tracing::debug!(meter = self.inner.id, port = b.port.id(), "meter detached");
        }
    }

    /// Feeds a reply into the meter as if it arrived on its port.
    ///
    /// This is the pool dispatcher's entry point; it is public so hosts with
    /// their own transport can route frames manually.
    pub fn ingest(&self, reply: &Reply) {
        self.inner.handle_reply(reply);
    }

    // =========================================================================
    // User callback
    // =========================================================================

    /// Attaches the per-reply callback, replacing any previous one.
    pub fn attach_callback(&self, f: impl FnMut(u8, &Reply) + Send + 'static) {
        *self.inner.callback.lock() = Some(Box::new(f));
    }

    /// Removes the per-reply callback.
    pub fn detach_callback(&self) {
        *self.inner.callback.lock() = None;
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Polls the meter for its metrics window.
    pub fn poll(&self) -> Result<(), CoreError> {
        self.inner.poll()
    }

    /// Reads the holding-register settings block.
    ///
    /// Issued through the catch-all address, this is how a solitary meter
    /// reports its configured slave address during provisioning.
    pub fn read_settings(&self) -> Result<(), CoreError> {
        let (model, addr) = self.inner.model_addr();
        self.inner.request(model.read_holdings(addr))
    }

    /// Resets the device's cumulative energy counter.
    pub fn reset_energy(&self) -> Result<(), CoreError> {
        let (_, addr) = self.inner.model_addr();
        self.inner.request(frame::reset_energy(addr))
    }

    /// Writes a new slave address. Out-of-range values degrade to a no-op
    /// echo at the frame layer; the state updates when the echo returns.
    pub fn set_address(&self, new_addr: u8) -> Result<(), CoreError> {
        let (_, addr) = self.inner.model_addr();
        self.inner.request(frame::set_slave_addr(new_addr, addr))
    }

    /// Sets the power alarm threshold in watts. AC meters only.
    pub fn set_alarm_threshold(&self, watts: u16) -> Result<(), CoreError> {
        let (model, addr) = self.inner.model_addr();
        match model {
            MeterModel::AcV3 => self.inner.request(ac::set_alarm_threshold(watts, addr)),
            actual => Err(CoreError::UnsupportedModel {
                meter: self.inner.id,
                required: MeterModel::AcV3,
                actual,
            }),
        }
    }

    /// Sets the high-voltage alarm threshold. DC meters only.
    pub fn set_alarm_high(&self, value: u16) -> Result<(), CoreError> {
        let (model, addr) = self.inner.model_addr();
        match model {
            MeterModel::Dc => self.inner.request(dc::set_alarm_high(value, addr)),
            actual => Err(CoreError::UnsupportedModel {
                meter: self.inner.id,
                required: MeterModel::Dc,
                actual,
            }),
        }
    }

    /// Sets the low-voltage alarm threshold. DC meters only.
    pub fn set_alarm_low(&self, value: u16) -> Result<(), CoreError> {
        let (model, addr) = self.inner.model_addr();
        match model {
            MeterModel::Dc => self.inner.request(dc::set_alarm_low(value, addr)),
            actual => Err(CoreError::UnsupportedModel {
                meter: self.inner.id,
                required: MeterModel::Dc,
                actual,
            }),
        }
    }

    /// Selects the shunt current range. DC meters only.
    pub fn set_shunt(&self, shunt: Shunt) -> Result<(), CoreError> {
        let (model, addr) = self.inner.model_addr();
        match model {
            MeterModel::Dc => self.inner.request(dc::set_shunt(shunt, addr)),
            actual => Err(CoreError::UnsupportedModel {
                meter: self.inner.id,
                required: MeterModel::Dc,
                actual,
            }),
        }
    }

    // =========================================================================
    // Periodic polling
    // =========================================================================

    /// Starts or stops the autopoll timer.
    ///
    /// Returns the resulting timer state. The timer task only enqueues a
    /// request per tick; it never blocks on the bus. Must be called inside a
    /// tokio runtime.
    pub fn autopoll(&self, enable: bool) -> bool {
        let mut slot = self.inner.poller.lock();
        if enable {
            if slot.is_some() {
                return true;
            }
            let weak = Arc::downgrade(&self.inner);
            let period = self.inner.poll_period_ms.load(Ordering::Relaxed);
            *slot = Some(tokio::spawn(meter_poll_task(weak, period)));
            tracing::debug!(meter = self.inner.id, period, "autopoll started");
            true
        } else {
            match slot.take() {
                Some(handle) => {
                    handle.abort();
                    tracing::debug!(meter = self.inner.id, "autopoll stopped");
                    false
                }
                None => false,
            }
        }
    }

    /// `true` while the autopoll timer is armed.
    pub fn autopoll_active(&self) -> bool {
        self.inner.poller.lock().is_some()
    }

    /// Current autopoll period in milliseconds.
    pub fn pollrate(&self) -> u64 {
        self.inner.poll_period_ms.load(Ordering::Relaxed)
    }

    /// Changes the autopoll period.
    ///
    /// Periods below [`POLL_MIN_PERIOD_MS`] are rejected and the previous
    /// rate stays in force. A running timer is rescheduled.
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
            *slot = Some(tokio::spawn(meter_poll_task(weak, period_ms)));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Meter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.read();
        f.debug_struct("Meter")
            .field("id", &self.inner.id)
            .field("descr", &self.inner.descr)
            .field("model", &st.model)
            .field("addr", &st.addr)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Inner
// =============================================================================

impl MeterInner {
    fn model_addr(&self) -> (MeterModel, u8) {
        let st = self.state.read();
        (st.model, st.addr)
    }

    fn request(&self, request: Request) -> Result<(), CoreError> {
        let binding = self.binding.lock();
        let Some(b) = binding.as_ref() else {
            return Err(CoreError::NotAttached { meter: self.id });
        };
        if b.port.enqueue(request) {
            Ok(())
        } else {
            Err(CoreError::Enqueue { port: b.port.id() })
        }
    }

    fn poll(&self) -> Result<(), CoreError> {
        let request = {
            let mut st = self.state.write();
            st.mark_request(clock::monotonic_us());
            st.model.read_metrics(st.addr)
        };
        self.request(request)
    }

    /// The meter's receive sink.
    ///
    /// Frames with a bad CRC or a foreign slave address are dropped without
    /// parsing or notifying anyone. Everything else updates the state and
    /// then fires the user callback — parse failures included, so the host
    /// can route replies the library does not understand.
    fn handle_reply(&self, reply: &Reply) {
        if !reply.is_valid() {
            tracing::trace!(meter = self.id, "invalid reply dropped");
            return;
        }

        let parse_result = {
            let mut st = self.state.write();
            if reply.slave_addr() != st.addr {
                tracing::trace!(
                    meter = self.id,
                    addr = st.addr,
                    reply_addr = reply.slave_addr(),
                    "reply for another slave dropped"
                );
                return;
            }
            st.apply_reply(reply, clock::monotonic_us())
        };

        if let Err(e) = parse_result {
            tracing::debug!(meter = self.id, error = %e, "reply did not parse");
        }

        if let Some(cb) = self.callback.lock().as_mut() {
            cb(self.id, reply);
        }
    }
}

impl Drop for MeterInner {
    fn drop(&mut self) {
        // The timer must die with the device object.
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}

async fn meter_poll_task(meter: Weak<MeterInner>, period_ms: u64) {
    let mut ticker = tokio::time::interval(Duration::from_millis(period_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval fires immediately; the first poll belongs one period out.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = meter.upgrade() else { break };
        if let Err(e) = inner.poll() {
            tracing::debug!(meter = inner.id, error = %e, "autopoll tick failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use emeter_bus::NullCable;
    use emeter_proto::{AcMetrics, MeterFault};
    use std::sync::atomic::AtomicUsize;

    fn wired_meter(model: MeterModel, addr: u8) -> (Meter, Arc<Port>, Port) {
        let (host, device) = NullCable::new(1, 2);
        let host = Arc::new(host);
        let meter = Meter::new(7, model, addr, "");
        meter.attach_port(host.clone(), PortAttach::Exclusive).unwrap();
        (meter, host, device)
    }

    #[test]
    fn test_default_descr() {
        let m = Meter::new(3, MeterModel::AcV3, 0x01, "");
        assert_eq!(m.descr(), "meter-3");
        let m = Meter::new(3, MeterModel::AcV3, 0x01, "barn feed");
        assert_eq!(m.descr(), "barn feed");
    }

    #[test]
    fn test_requests_require_attachment() {
        let m = Meter::new(1, MeterModel::AcV3, 0x01, "");
        assert!(matches!(m.poll(), Err(CoreError::NotAttached { meter: 1 })));
    }

    #[test]
    fn test_double_attach_rejected() {
        let (_host, device) = NullCable::new(1, 2);
        let port = Arc::new(device);
        let m = Meter::new(1, MeterModel::AcV3, 0x01, "");
        m.attach_port(port.clone(), PortAttach::TxOnly).unwrap();
        assert!(matches!(
            m.attach_port(port, PortAttach::TxOnly),
            Err(CoreError::AlreadyAttached { .. })
        ));
    }

    #[test]
    fn test_model_gated_operations() {
        let ac_meter = Meter::new(1, MeterModel::AcV3, 0x01, "");
        assert!(matches!(
            ac_meter.set_shunt(Shunt::A100),
            Err(CoreError::UnsupportedModel { .. })
        ));
        assert!(matches!(
            ac_meter.set_alarm_high(100),
            Err(CoreError::UnsupportedModel { .. })
        ));

        let dc_meter = Meter::new(2, MeterModel::Dc, 0x02, "");
        assert!(matches!(
            dc_meter.set_alarm_threshold(100),
            Err(CoreError::UnsupportedModel { .. })
        ));
    }

    #[test]
    fn test_ingest_updates_state_and_fires_callback() {
        let m = Meter::new(1, MeterModel::AcV3, 0x01, "");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        m.attach_callback(move |id, reply| {
            assert_eq!(id, 1);
            assert!(reply.is_valid());
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        let metrics = AcMetrics {
            voltage: 2300,
            energy: 5,
            ..AcMetrics::default()
        };
        m.ingest(&metrics.to_reply(0x01));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(m.metrics().as_ac().unwrap().voltage, 2300);
        assert_eq!(m.state().last_error, None);
    }

    #[test]
    fn test_ingest_drops_foreign_address_silently() {
        let m = Meter::new(1, MeterModel::AcV3, 0x01, "");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        m.attach_callback(move |_, _| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        m.ingest(&AcMetrics::default().to_reply(0x09));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(m.metrics().as_ac().unwrap().voltage, 0);
    }

    #[test]
    fn test_ingest_fires_callback_on_parse_failure() {
        let m = Meter::new(1, MeterModel::AcV3, 0x01, "");
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();
        m.attach_callback(move |_, _| {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        // Valid CRC, right address, but a DC-sized body on an AC meter.
        let mut bytes = vec![0x01, 0x04, 0x10];
        bytes.extend_from_slice(&[0u8; 16]);
        emeter_proto::crc::append(&mut bytes);
        m.ingest(&Reply::from_bytes(bytes));

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(m.state().last_error, Some(MeterFault::Parse));
    }

    #[tokio::test]
    async fn test_poll_reaches_the_wire() {
        let (meter, host, device) = wired_meter(MeterModel::AcV3, 0x05);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        device.attach_rx_handler(move |reply| {
            assert_eq!(reply.slave_addr(), 0x05);
            assert_eq!(reply.function_raw(), 0x04);
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        host.start().await;
        device.start().await;

        meter.poll().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(meter.state().last_request_us > 0);

        host.stop().await;
        device.stop().await;
    }

    #[tokio::test]
    async fn test_pollrate_bounds() {
        let m = Meter::new(1, MeterModel::AcV3, 0x01, "");
        assert_eq!(m.pollrate(), POLL_PERIOD_MS);

        assert!(matches!(
            m.set_pollrate(0),
            Err(CoreError::PollRateTooFast { .. })
        ));
        assert!(matches!(
            m.set_pollrate(POLL_MIN_PERIOD_MS - 1),
            Err(CoreError::PollRateTooFast { .. })
        ));
        assert_eq!(m.pollrate(), POLL_PERIOD_MS, "rejected rate must not stick");

        m.set_pollrate(2000).unwrap();
        assert_eq!(m.pollrate(), 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autopoll_enqueues_periodically() {
        let (meter, host, device) = wired_meter(MeterModel::AcV3, 0x03);

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        device.attach_rx_handler(move |_| {
            seen2.fetch_add(1, Ordering::SeqCst);
        });

        host.start().await;
        device.start().await;

        assert!(meter.autopoll(true));
        assert!(meter.autopoll_active());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let polls = seen.load(Ordering::SeqCst);
        assert!(
            (2..=4).contains(&polls),
            "expected ~3 polls after 3.5 periods, saw {polls}"
        );

        assert!(!meter.autopoll(false));
        assert!(!meter.autopoll_active());

        host.stop().await;
        device.stop().await;
    }
}
