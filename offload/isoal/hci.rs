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

//! Delivery of produced SDUs to the Host, as HCI ISO Data packets,
//! Core Vol 4, Part E - 5.4.5

use crate::pdu::PduRx;
use crate::reader::{unpack, Reader};
use crate::session::{SduBuffer, SduFragment, SduProduced, Session, SinkCallbacks};
use crate::status::{SduStatus, SinkHandle, Status};
use crate::writer::{pack, Write, Writer};
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Largest SDU length of the ISO Data Load header
pub const ISO_SDU_LENGTH_MAX: usize = 0xfff;

/// Largest connection handle
pub const CONNECTION_HANDLE_MAX: u16 = 0xeff;

/// HCI ISO Data packet
#[derive(Debug, PartialEq, Eq)]
pub struct IsoData<'a> {
    /// Identify the connection
    pub connection_handle: u16,
    /// Position of the fragment in the SDU (PB_Flag)
    pub fragment: SduFragment,
    /// Present on the first fragment of an SDU only
    pub header: Option<IsoSduHeader>,
    pub payload: &'a [u8],
}

/// Header of an SDU, carried by its first fragment
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IsoSduHeader {
    /// Optional timestamp in microseconds
    pub timestamp: Option<u32>,
    pub sequence_number: u16,
    /// Total length of the SDU (sum of all fragments)
    pub sdu_length: u16,
    /// Packet_Status_Flag
    pub status: SduStatus,
}

impl<'a> IsoData<'a> {
    /// Complete SDU in a single packet
    pub fn complete(connection_handle: u16, header: IsoSduHeader, payload: &'a [u8]) -> Self {
        Self { connection_handle, fragment: SduFragment::Single, header: Some(header), payload }
    }

    /// Read an HCI ISO Data packet
    pub fn from_bytes(data: &'a [u8]) -> Option<Self> {
        Self::parse(&mut Reader::new(data))
    }

    /// Output the HCI ISO Data packet
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new(Vec::with_capacity(12 + self.payload.len()));
        w.write(self);
        w.into_vec()
    }

    fn parse(r: &mut Reader<'a>) -> Option<Self> {
        let (connection_handle, pb_flag, ts_flag, _) = unpack!(r.read_u16()?, (12, 2, 1, 1));
        let (data_len, _) = unpack!(r.read_u16()?, (14, 2));
        let mut r = Reader::new(r.get(data_len.into())?);

        let fragment = match pb_flag {
            0b00 => SduFragment::Start,
            0b01 => SduFragment::Cont,
            0b10 => SduFragment::Single,
            _ => SduFragment::End,
        };
        let header = match fragment {
            SduFragment::Start | SduFragment::Single => {
                Some(IsoSduHeader::parse(&mut r, ts_flag != 0)?)
            }
            SduFragment::Cont | SduFragment::End => None,
        };

        Some(Self { connection_handle, fragment, header, payload: r.get(r.remaining())? })
    }
}

impl Write for IsoData<'_> {
    fn write(&self, w: &mut Writer) {
        let pb_flag: u16 = match self.fragment {
            SduFragment::Start => 0b00,
            SduFragment::Cont => 0b01,
            SduFragment::Single => 0b10,
            SduFragment::End => 0b11,
        };
        let ts_flag = self.header.is_some_and(|hdr| hdr.timestamp.is_some()) as u16;
        w.write_u16(pack!((self.connection_handle, 12), (pb_flag, 2), (ts_flag, 1)));

        let data_len = self.header.map_or(0, |hdr| hdr.len()) + self.payload.len();
        w.write_u16(pack!(u16::try_from(data_len).unwrap(), 14));

        if let Some(ref hdr) = self.header {
            w.write(hdr);
        }
        w.put(self.payload);
    }
}

impl IsoSduHeader {
    fn len(&self) -> usize {
        4 + 4 * (self.timestamp.is_some() as usize)
    }

    fn parse(r: &mut Reader, ts_present: bool) -> Option<Self> {
        let timestamp = match ts_present {
            true => Some(r.read_u32::<4>()?),
            false => None,
        };
        let sequence_number = r.read_u16()?;
        let (sdu_length, _, status) = unpack!(r.read_u16()?, (12, 2, 2));
        let status = SduStatus::from_bits_truncate(status as u8);
        Some(Self { timestamp, sequence_number, sdu_length, status })
    }

    /// Lost data supersedes possibly invalid data
    fn packet_status_flag(&self) -> u16 {
        match self.status {
            s if s.contains(SduStatus::LOST_DATA) => SduStatus::LOST_DATA.bits().into(),
            s => s.bits().into(),
        }
    }
}

impl Write for IsoSduHeader {
    fn write(&self, w: &mut Writer) {
        if let Some(timestamp) = self.timestamp {
            w.write_u32::<4>(timestamp);
        }
        w.write_u16(self.sequence_number);
        w.write_u16(pack!((self.sdu_length, 12), (0, 2), (self.packet_status_flag(), 2)));
    }
}

/// Receiver of the ISO Data packets produced for the Host
pub trait IsoDataSink: Send + Sync {
    /// ISO Data from Controller to Host
    fn in_iso(&self, data: &[u8]);
}

/// SDU callbacks of a sink, delivering each recombined SDU to the Host in
/// a single HCI ISO Data packet.
///
/// Destination buffers are taken from a fixed pool, and released as soon
/// as their content is emitted.
pub struct HciIsoSink {
    host: Arc<dyn IsoDataSink>,
    buf_size: usize,
    state: Mutex<State>,
}

struct State {
    /// Destination buffers, `None` when free
    buffers: Vec<Option<BytesMut>>,
    /// SDUs in progress, by sink
    pending: HashMap<SinkHandle, PendingSdu>,
}

struct PendingSdu {
    seqn: u16,
    timestamp: u32,
    status: SduStatus,
    data: BytesMut,
}

impl HciIsoSink {
    /// Sink callbacks with `buf_count` destination buffers of `buf_size` bytes
    pub fn new(host: Arc<dyn IsoDataSink>, buf_size: usize, buf_count: usize) -> Self {
        assert!(buf_size > 0, "SDU buffers cannot be empty");
        let buffers = (0..buf_count).map(|_| None).collect();
        Self { host, buf_size, state: Mutex::new(State { buffers, pending: HashMap::new() }) }
    }

    fn deliver(&self, session: &Session, sdu: PendingSdu) -> Status {
        if sdu.data.len() > ISO_SDU_LENGTH_MAX || session.handle() > CONNECTION_HANDLE_MAX {
            log::error!(
                "{}: SDU of {} bytes cannot be sent on handle 0x{:03x}",
                session.sink(),
                sdu.data.len(),
                session.handle()
            );
            return Status::ERR_SDU_EMIT;
        }

        let header = IsoSduHeader {
            timestamp: Some(sdu.timestamp),
            sequence_number: sdu.seqn,
            sdu_length: sdu.data.len() as u16,
            status: sdu.status,
        };
        self.host.in_iso(&IsoData::complete(session.handle(), header, &sdu.data).to_bytes());
        Status::OK
    }
}

impl SinkCallbacks for HciIsoSink {
    fn sdu_alloc(&self, session: &Session, _pdu: &PduRx) -> Result<SduBuffer, Status> {
        let mut state = self.state.lock().unwrap();
        let Some(dbuf) = state.buffers.iter().position(Option::is_none) else {
            log::warn!("{}: no free SDU buffer", session.sink());
            return Err(Status::ERR_SDU_ALLOC);
        };
        state.buffers[dbuf] = Some(BytesMut::zeroed(self.buf_size));
        Ok(SduBuffer { dbuf, size: self.buf_size })
    }

    fn sdu_write(&self, dbuf: &SduBuffer, offset: usize, src: &[u8]) -> Status {
        let mut state = self.state.lock().unwrap();
        let Some(Some(buf)) = state.buffers.get_mut(dbuf.dbuf) else {
            return Status::ERR_UNSPECIFIED;
        };
        match buf.get_mut(offset..offset + src.len()) {
            Some(dst) => {
                dst.copy_from_slice(src);
                Status::OK
            }
            None => Status::ERR_UNSPECIFIED,
        }
    }

    fn sdu_emit(&self, session: &Session, sdu: &SduProduced) -> Status {
        let sink = session.sink();
        let complete = {
            let mut state = self.state.lock().unwrap();
            let Some(buf) = state.buffers.get_mut(sdu.contents.dbuf).and_then(Option::take) else {
                return Status::ERR_SDU_EMIT;
            };

            let mut pending = match sdu.fragment {
                SduFragment::Start | SduFragment::Single => {
                    if let Some(dropped) = state.pending.remove(&sink) {
                        log::warn!("{}: SDU {} dropped, end never seen", sink, dropped.seqn);
                    }
                    PendingSdu {
                        seqn: sdu.seqn,
                        timestamp: sdu.timestamp,
                        status: SduStatus::VALID,
                        data: BytesMut::with_capacity(sdu.written),
                    }
                }
                SduFragment::Cont | SduFragment::End => match state.pending.remove(&sink) {
                    Some(pending) if pending.seqn == sdu.seqn => pending,
                    _ => {
                        log::warn!("{}: SDU {} continued without start", sink, sdu.seqn);
                        return Status::ERR_SDU_EMIT;
                    }
                },
            };

            pending.data.extend_from_slice(&buf[..sdu.written]);
            pending.status |= sdu.status;

            match sdu.fragment {
                SduFragment::Start | SduFragment::Cont => {
                    state.pending.insert(sink, pending);
                    None
                }
                SduFragment::End | SduFragment::Single => Some(pending),
            }
        };

        match complete {
            Some(pending) => self.deliver(session, pending),
            None => Status::OK,
        }
    }
}

#[test]
fn test_iso_data() {
    let dump = [
        0x60, 0x60, 0x0b, 0x00, 0x4d, 0xc8, 0xd0, 0x2f, 0x19, 0x03, 0x03, 0x80, 0xaa, 0xbb, 0xcc,
    ];
    let Some(pkt) = IsoData::from_bytes(&dump) else { panic!() };
    assert_eq!(pkt.connection_handle, 0x060);
    assert_eq!(pkt.fragment, SduFragment::Single);

    let Some(hdr) = pkt.header else { panic!() };
    assert_eq!(hdr.timestamp, Some(802_211_917));
    assert_eq!(hdr.sequence_number, 793);
    assert_eq!(hdr.sdu_length, 3);
    assert_eq!(hdr.status, SduStatus::LOST_DATA);
    assert_eq!(pkt.payload, &[0xaa, 0xbb, 0xcc]);

    assert_eq!(pkt.to_bytes(), &dump[..]);
}

#[test]
fn test_iso_data_fragments() {
    let Some(pkt) = IsoData::from_bytes(&[0x23, 0x31, 0x02, 0x00, 0x01, 0x02]) else { panic!() };
    assert_eq!(pkt.connection_handle, 0x123);
    assert_eq!(pkt.fragment, SduFragment::End);
    assert!(pkt.header.is_none());
    assert_eq!(pkt.payload, &[0x01, 0x02]);

    let hdr = IsoSduHeader {
        sequence_number: 2,
        sdu_length: 1,
        status: SduStatus::ERRORS | SduStatus::LOST_DATA,
        ..Default::default()
    };
    let bytes = IsoData { fragment: SduFragment::Start, ..IsoData::complete(0x001, hdr, &[0x55]) }
        .to_bytes();
    assert_eq!(bytes, vec![0x01, 0x00, 0x05, 0x00, 0x02, 0x00, 0x01, 0x80, 0x55]);

    // Data length larger than the packet
    assert!(IsoData::from_bytes(&[0x23, 0x31, 0x03, 0x00, 0x01, 0x02]).is_none());
}
