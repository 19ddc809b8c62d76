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

use crate::pdu::PduRx;
use crate::status::{Error, SduStatus, SinkHandle, Status};
use std::sync::Arc;

/// Unit of the ISO_Interval, in microseconds
pub const ISO_INTERVAL_UNIT_US: u32 = 1250;

/// Role of the local device on the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Central,
    Peripheral,
}

/// Parameters of the isochronous stream received by a sink
#[derive(Debug, Clone)]
pub struct SinkParameters {
    /// Connection handle of the stream
    pub handle: u16,
    pub role: Role,
    /// Number of payloads expected in each event
    pub burst_number: u8,
    /// Number of events a payload can be (re)transmitted
    pub flush_timeout: u8,
    /// SDU interval in microseconds
    pub sdu_interval: u32,
    /// ISO interval, in multiple of 1.25 ms
    pub iso_interval: u16,
    /// CIS sync delay in microseconds
    pub cis_sync_delay: u32,
    /// CIG sync delay in microseconds
    pub cig_sync_delay: u32,
}

/// Kind of isochronous stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsoMode {
    #[default]
    Cis,
    Bis,
}

/// Configuration of a sink, completed by the owner after creation
#[derive(Debug, Clone, Default)]
pub struct SinkConfig {
    pub mode: IsoMode,
}

/// Destination buffer of an SDU, provided by the SDU allocator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SduBuffer {
    /// Reference of the storage, only interpreted by the callbacks
    pub dbuf: usize,
    /// Capacity in bytes
    pub size: usize,
}

/// Position of an emitted chunk within its SDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SduFragment {
    /// First chunk, more to follow
    #[default]
    Start,
    /// Neither the first nor the last chunk
    Cont,
    /// Last chunk
    End,
    /// The chunk is the whole SDU
    Single,
}

/// SDU (or chunk of SDU) handed to the emitter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SduProduced {
    /// Destination buffer holding the data
    pub contents: SduBuffer,
    /// Bytes written in the buffer
    pub written: usize,
    /// SDU synchronization reference, in microseconds
    pub timestamp: u32,
    /// Sequence number of the SDU
    pub seqn: u16,
    /// Quality of the data, accumulated over the SDU
    pub status: SduStatus,
    pub fragment: SduFragment,
}

/// Platform operations used by a sink to produce SDUs.
///
/// Callbacks are invoked synchronously from `Isoal::recombine`, and must not
/// block nor call back into the recombination of the same sink.
pub trait SinkCallbacks: Send + Sync {
    /// Allocate a destination buffer, the PDU origin may determine the buffer.
    /// A zero sized buffer is a fatal misconfiguration.
    fn sdu_alloc(&self, session: &Session, pdu: &PduRx) -> Result<SduBuffer, Status>;

    /// Emit a complete SDU, or a chunk of SDU
    fn sdu_emit(&self, session: &Session, sdu: &SduProduced) -> Status;

    /// Copy `src` in the destination buffer, at `offset`
    fn sdu_write(&self, dbuf: &SduBuffer, offset: usize, src: &[u8]) -> Status;
}

/// Session of a sink: connection identity, timing constants, and callbacks.
/// Immutable after creation, except the SDU sequence counter.
pub struct Session {
    sink: SinkHandle,
    handle: u16,
    pub(crate) pdus_per_sdu: u32,
    pub(crate) latency_unframed: u32,
    pub(crate) latency_framed: u32,
    pub(crate) seqn: u16,
    pub(crate) config: SinkConfig,
    pub(crate) callbacks: Arc<dyn SinkCallbacks>,
}

/// Snapshot of the timing model and counters of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    pub handle: u16,
    pub pdus_per_sdu: u32,
    pub latency_unframed: u32,
    pub latency_framed: u32,
    pub seqn: u16,
}

impl Session {
    pub(crate) fn new(
        sink: SinkHandle,
        params: &SinkParameters,
        callbacks: Arc<dyn SinkCallbacks>,
    ) -> Result<Self, Error> {
        if params.iso_interval == 0 {
            return Err(Error::InvalidParameters("ISO interval is zero"));
        }
        if params.sdu_interval == 0 {
            return Err(Error::InvalidParameters("SDU interval is zero"));
        }

        let sdu_interval = params.sdu_interval;
        let iso_interval = params.iso_interval as u32;
        let cis_sync_delay = params.cis_sync_delay;
        let cig_sync_delay = params.cig_sync_delay;
        let flush_timeout = params.flush_timeout as u32;

        // SDU interval is in microseconds, ISO interval a multiple of 1.25 ms
        let pdus_per_sdu =
            (params.burst_number as u32) * (sdu_interval / (iso_interval * ISO_INTERVAL_UNIT_US));

        // Constant part of the SDU synchronization reference, from the CIS
        // reference anchor point. The framed latency is completed by the time
        // offset of each SDU.
        let (latency_unframed, latency_framed) = match params.role {
            Role::Peripheral => (
                cis_sync_delay
                    .wrapping_add(flush_timeout.wrapping_sub(1).wrapping_mul(iso_interval)),
                cis_sync_delay
                    .wrapping_add(sdu_interval)
                    .wrapping_add(flush_timeout.wrapping_mul(iso_interval)),
            ),
            Role::Central => (
                cis_sync_delay.wrapping_sub(cig_sync_delay).wrapping_sub(
                    (iso_interval / sdu_interval).wrapping_sub(1).wrapping_mul(iso_interval),
                ),
                cis_sync_delay.wrapping_sub(cig_sync_delay),
            ),
        };

        Ok(Self {
            sink,
            handle: params.handle,
            pdus_per_sdu,
            latency_unframed,
            latency_framed,
            seqn: 0,
            config: Default::default(),
            callbacks,
        })
    }

    /// Handle of the sink owning the session
    pub fn sink(&self) -> SinkHandle {
        self.sink
    }

    /// Connection handle of the stream
    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            handle: self.handle,
            pdus_per_sdu: self.pdus_per_sdu,
            latency_unframed: self.latency_unframed,
            latency_framed: self.latency_framed,
            seqn: self.seqn,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct NoCallbacks;

    impl SinkCallbacks for NoCallbacks {
        fn sdu_alloc(&self, _: &Session, _: &PduRx) -> Result<SduBuffer, Status> {
            Err(Status::ERR_SDU_ALLOC)
        }
        fn sdu_emit(&self, _: &Session, _: &SduProduced) -> Status {
            Status::ERR_SDU_EMIT
        }
        fn sdu_write(&self, _: &SduBuffer, _: usize, _: &[u8]) -> Status {
            Status::ERR_UNSPECIFIED
        }
    }

    fn session(params: &SinkParameters) -> Result<Session, Error> {
        Session::new(SinkHandle(0), params, Arc::new(NoCallbacks))
    }

    fn params(role: Role) -> SinkParameters {
        SinkParameters {
            handle: 0x060,
            role,
            burst_number: 1,
            flush_timeout: 2,
            sdu_interval: 12_500,
            iso_interval: 10,
            cis_sync_delay: 1000,
            cig_sync_delay: 600,
        }
    }

    #[test]
    fn peripheral_latencies() {
        let info = session(&params(Role::Peripheral)).unwrap().info();
        assert_eq!(info.latency_unframed, 1010);
        assert_eq!(info.latency_framed, 1000 + 12_500 + 20);
        assert_eq!(info.pdus_per_sdu, 1);
        assert_eq!(info.seqn, 0);
    }

    #[test]
    fn central_latencies() {
        // ISO interval (in units) divided by the SDU interval (in us) truncates to 0,
        // the unframed latency wraps exactly as the unsigned reference computation
        let info = session(&params(Role::Central)).unwrap().info();
        assert_eq!(info.latency_unframed, 400 + 10);
        assert_eq!(info.latency_framed, 400);

        let info = session(&SinkParameters { sdu_interval: 5, ..params(Role::Central) })
            .unwrap()
            .info();
        assert_eq!(info.latency_unframed, 400 - 10);
    }

    #[test]
    fn pdus_per_sdu_truncates() {
        let p = SinkParameters { burst_number: 3, sdu_interval: 24_999, ..params(Role::Central) };
        assert_eq!(session(&p).unwrap().info().pdus_per_sdu, 3);

        let p = SinkParameters { burst_number: 2, sdu_interval: 25_000, ..params(Role::Central) };
        assert_eq!(session(&p).unwrap().info().pdus_per_sdu, 4);

        let p = SinkParameters { sdu_interval: 10_000, ..params(Role::Peripheral) };
        assert_eq!(session(&p).unwrap().info().pdus_per_sdu, 0);
    }

    #[test]
    fn zero_flush_timeout_wraps() {
        let p = SinkParameters { flush_timeout: 0, ..params(Role::Peripheral) };
        assert_eq!(session(&p).unwrap().info().latency_unframed, 1000 - 10);
    }

    #[test]
    fn invalid_intervals() {
        let p = SinkParameters { iso_interval: 0, ..params(Role::Peripheral) };
        assert!(matches!(session(&p), Err(Error::InvalidParameters(_))));

        let p = SinkParameters { sdu_interval: 0, ..params(Role::Central) };
        assert!(matches!(session(&p), Err(Error::InvalidParameters(_))));
    }
}
