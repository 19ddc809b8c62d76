// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::pdu::{IsoPdu, Llid, PduMeta, PduRx};
use crate::production::SinkState;
use crate::session::{Session, SessionInfo, SinkCallbacks, SinkConfig, SinkParameters};
use crate::status::{Error, SinkHandle, Status};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Number of sinks that can be allocated simultaneously
pub const ISOAL_SINKS_MAX: usize = 4;

/// Production mode: PDUs are latched-in
const MODE_ENABLED: u8 = 0x01;

/// Production mode: bookkeeping is cleared before the next PDU is consumed
const MODE_RESET: u8 = 0x02;

#[derive(Default)]
struct Slot {
    /// Allocation state, changed by create and destroy only
    allocated: AtomicBool,
    /// Production mode word, can be changed from a context preempting the recombination
    mode: AtomicU8,
    state: Mutex<Option<SinkState>>,
}

impl Slot {
    fn is_enabled(&self) -> bool {
        self.mode.load(Ordering::Acquire) & MODE_ENABLED != 0
    }

    fn enable(&self) {
        self.mode.store(MODE_ENABLED | MODE_RESET, Ordering::Release);
    }

    fn disable(&self) {
        self.mode.store(0, Ordering::Release);
    }

    /// Consume a pending reset request
    fn take_reset(&self) -> bool {
        self.mode.fetch_and(!MODE_RESET, Ordering::AcqRel) & MODE_RESET != 0
    }
}

/// Receive side of the ISO Adaptation Layer: a fixed pool of sinks,
/// recombining received PDUs into SDUs.
///
/// Sink creation and destruction must be serialized by the caller. Enabling
/// and disabling a sink only change its atomic mode word, and never wait on
/// a recombination in progress, which runs to completion. The production
/// reset requested by an enable is applied by the next recombination.
pub struct Isoal {
    sinks: [Slot; ISOAL_SINKS_MAX],
}

impl Default for Isoal {
    fn default() -> Self {
        Self::new()
    }
}

impl Isoal {
    /// Initialize the ISO-AL, with all sinks free
    pub fn new() -> Self {
        Self { sinks: std::array::from_fn(|_| Default::default()) }
    }

    /// Clean up and reinitialize, releasing all sinks
    pub fn reset(&self) {
        for slot in &self.sinks {
            slot.disable();
            *slot.state.lock().unwrap() = None;
            slot.allocated.store(false, Ordering::Release);
        }
    }

    fn slot(&self, hdl: SinkHandle) -> Result<&Slot, Error> {
        match self.sinks.get(hdl.index()) {
            Some(slot) if slot.allocated.load(Ordering::Acquire) => Ok(slot),
            _ => Err(Error::InvalidHandle(hdl)),
        }
    }

    fn sink_state(&self, hdl: SinkHandle) -> Result<MutexGuard<'_, Option<SinkState>>, Error> {
        let state = self.slot(hdl)?.state.lock().unwrap();
        if state.is_none() {
            return Err(Error::InvalidHandle(hdl));
        }
        Ok(state)
    }

    /// Find the first free sink and take it
    fn sink_allocate(&self) -> Result<SinkHandle, Error> {
        for (i, slot) in self.sinks.iter().enumerate() {
            if slot
                .allocated
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(SinkHandle(i as u8));
            }
        }
        Err(Error::SinkAlloc { max: ISOAL_SINKS_MAX })
    }

    fn sink_deallocate(&self, hdl: SinkHandle) {
        self.sinks[hdl.index()].allocated.store(false, Ordering::Release);
    }

    /// Create a sink for a stream, initially disabled.
    /// The timing constants of the session are derived from `params`.
    pub fn sink_create(
        &self,
        params: &SinkParameters,
        callbacks: Arc<dyn SinkCallbacks>,
    ) -> Result<SinkHandle, Error> {
        let hdl = self.sink_allocate()?;

        let session = match Session::new(hdl, params, callbacks) {
            Ok(session) => session,
            Err(err) => {
                self.sink_deallocate(hdl);
                return Err(err);
            }
        };

        let info = session.info();
        log::debug!(
            "{}: created for handle 0x{:03x}, {} PDUs per SDU, latency {} / {} us",
            hdl,
            info.handle,
            info.pdus_per_sdu,
            info.latency_unframed,
            info.latency_framed
        );

        let slot = &self.sinks[hdl.index()];
        slot.disable();
        *slot.state.lock().unwrap() = Some(SinkState::new(session));
        Ok(hdl)
    }

    /// Disable and release a sink
    pub fn sink_destroy(&self, hdl: SinkHandle) -> Result<(), Error> {
        self.sink_disable(hdl)?;
        *self.sinks[hdl.index()].state.lock().unwrap() = None;
        self.sink_deallocate(hdl);
        log::debug!("{}: destroyed", hdl);
        Ok(())
    }

    /// Access the configuration of a sink, for the owner to complete it
    pub fn sink_config<R>(
        &self,
        hdl: SinkHandle,
        f: impl FnOnce(&mut SinkConfig) -> R,
    ) -> Result<R, Error> {
        let mut state = self.sink_state(hdl)?;
        let Some(sink) = state.as_mut() else { unreachable!() };
        Ok(f(&mut sink.session.config))
    }

    /// Snapshot of the session of a sink
    pub fn sink_session(&self, hdl: SinkHandle) -> Result<SessionInfo, Error> {
        let state = self.sink_state(hdl)?;
        let Some(sink) = state.as_ref() else { unreachable!() };
        Ok(sink.session.info())
    }

    /// Start latching-in PDUs, from a reset SDU production
    pub fn sink_enable(&self, hdl: SinkHandle) -> Result<(), Error> {
        self.slot(hdl)?.enable();
        log::debug!("{}: enabled", hdl);
        Ok(())
    }

    /// Stop latching-in PDUs, the production bookkeeping is left as is
    pub fn sink_disable(&self, hdl: SinkHandle) -> Result<(), Error> {
        self.slot(hdl)?.disable();
        log::debug!("{}: disabled", hdl);
        Ok(())
    }

    /// Returns true when the sink is allocated and enabled
    pub fn is_sink_enabled(&self, hdl: SinkHandle) -> bool {
        self.slot(hdl).is_ok_and(Slot::is_enabled)
    }

    /// Recombine a received PDU into SDUs of the sink.
    ///
    /// Returns `ERR_SDU_ALLOC`, without side effect, when the sink is disabled.
    /// Otherwise returns the statuses of the allocations, writes and emits made.
    pub fn recombine(&self, hdl: SinkHandle, pdu: &PduRx) -> Status {
        let Ok(slot) = self.slot(hdl) else {
            return Status::ERR_SDU_ALLOC;
        };
        if !slot.is_enabled() {
            return Status::ERR_SDU_ALLOC;
        }

        let mut state = slot.state.lock().unwrap();
        let Some(sink) = state.as_mut() else {
            return Status::ERR_SDU_ALLOC;
        };
        if slot.take_reset() {
            sink.production = Default::default();
        }

        match pdu.pdu.llid {
            Llid::Framed => sink.framed_consume(pdu),
            Llid::UnframedCompleteEnd | Llid::UnframedStartContinue => sink.unframed_consume(pdu),
        }
    }

    /// Decode a PDU, header and payload, and recombine it
    pub fn recombine_bytes(&self, hdl: SinkHandle, meta: PduMeta, data: &[u8]) -> Status {
        match IsoPdu::from_bytes(data) {
            Some(pdu) => self.recombine(hdl, &PduRx::new(meta, pdu)),
            None => {
                log::warn!("{}: malformed PDU of {} bytes", hdl, data.len());
                Status::ERR_UNSPECIFIED
            }
        }
    }
}
