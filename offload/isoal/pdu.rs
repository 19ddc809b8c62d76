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

//! Received ISO Data PDUs, Core Vol 6, Part B - 2.6
//! and segmentation headers of framed PDUs, Core Vol 6, Part G - 6.2

use crate::reader::{unpack, Reader};
use crate::status::PduStatus;
use crate::writer::{pack, Write, Writer};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use thiserror::Error;

/// Size of the segmentation header, without time offset
pub const SEG_HDR_SIZE: usize = 2;

/// Size of the time offset field, present on segments starting an SDU
pub const SEG_TIMEOFFSET_SIZE: usize = 3;

/// Logical Link Identifier of a CIS / BIS Data PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Llid {
    /// Unframed, complete SDU or end fragment of an SDU
    UnframedCompleteEnd = 0b00,
    /// Unframed, start or continuation fragment of an SDU
    UnframedStartContinue = 0b01,
    /// Framed, one or more segments
    Framed = 0b10,
}

/// ISO Data PDU as seen by the adaptation layer
#[derive(Debug, Clone, Copy)]
pub struct IsoPdu<'a> {
    /// Format of the payload
    pub llid: Llid,
    /// Payload, its length is the PDU length
    pub payload: &'a [u8],
}

/// Meta information on a received PDU, given by the link layer
#[derive(Debug, Clone, Copy, Default)]
pub struct PduMeta {
    /// Anchor point of the event, in microseconds
    pub timestamp: u32,
    /// Payload number of the PDU in the stream
    pub payload_number: u64,
    /// Reception status
    pub status: PduStatus,
}

/// Received PDU along with its meta information
#[derive(Debug, Clone, Copy)]
pub struct PduRx<'a> {
    pub meta: PduMeta,
    pub pdu: IsoPdu<'a>,
}

impl<'a> IsoPdu<'a> {
    /// New PDU from a format and payload
    pub fn new(llid: Llid, payload: &'a [u8]) -> Self {
        Self { llid, payload }
    }

    /// Read a PDU, header followed by the payload.
    /// Trailing bytes beyond the header length (MIC, padding) are ignored.
    pub fn from_bytes(data: &'a [u8]) -> Option<Self> {
        let mut r = Reader::new(data);
        let (llid, _nesn, _sn, _cie, _rfu) = unpack!(r.read_u8()?, (2, 1, 1, 1, 3));
        let len = r.read_u8()? as usize;
        Some(Self { llid: Llid::from_u8(llid)?, payload: r.get(len)? })
    }

    /// Output the PDU, with sequencing bits cleared
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new(Vec::with_capacity(2 + self.payload.len()));
        w.write(self);
        w.into_vec()
    }

    /// Iterate over the segments of a framed PDU
    pub fn segments(&self) -> Segments<'a> {
        Segments::new(self.payload)
    }
}

impl Write for IsoPdu<'_> {
    fn write(&self, w: &mut Writer) {
        w.write_u8(self.llid as u8);
        w.write_u8(self.payload.len().try_into().unwrap());
        w.put(self.payload);
    }
}

impl<'a> PduRx<'a> {
    /// Received PDU
    pub fn new(meta: PduMeta, pdu: IsoPdu<'a>) -> Self {
        Self { meta, pdu }
    }
}

/// Segmentation header of a framed PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Continuation of an SDU when set, start of an SDU otherwise
    pub sc: bool,
    /// The segment completes the SDU
    pub cmplt: bool,
    /// Length following the 2 bytes header, including the time offset
    pub length: u8,
    /// Time offset in microseconds, present iff `sc` is clear
    pub time_offset: Option<u32>,
}

/// Segment of a framed PDU
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub header: SegmentHeader,
    /// Position of the header in the PDU payload
    pub offset: usize,
    /// SDU data carried, without the time offset
    pub data: &'a [u8],
}

/// A segment cannot be decoded within the bounds of the PDU
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("malformed segment at offset {offset}")]
pub struct MalformedSegment {
    pub offset: usize,
}

/// Cursor over the segments of a framed PDU payload.
///
/// Iteration stops once the next header would start past the last byte of
/// the payload. A segment that does not fit the remaining bytes is reported
/// once, and ends the iteration.
pub struct Segments<'a> {
    payload: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Segments<'a> {
    /// Segments of a framed PDU payload
    pub fn new(payload: &'a [u8]) -> Self {
        Self { payload, pos: 0, done: false }
    }

    fn parse(r: &mut Reader<'a>) -> Option<(SegmentHeader, &'a [u8])> {
        let (sc, cmplt, _rfu) = unpack!(r.read_u8()?, (1, 1, 6));
        let length = r.read_u8()?;
        let (time_offset, data_len) = match sc {
            0 => (Some(r.read_u32::<3>()?), (length as usize).checked_sub(SEG_TIMEOFFSET_SIZE)?),
            _ => (None, length as usize),
        };
        let header = SegmentHeader { sc: sc != 0, cmplt: cmplt != 0, length, time_offset };
        Some((header, r.get(data_len)?))
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<Segment<'a>, MalformedSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.payload.len() {
            return None;
        }

        let offset = self.pos;
        let mut r = Reader::new(&self.payload[offset..]);
        let Some((header, data)) = Self::parse(&mut r) else {
            self.done = true;
            return Some(Err(MalformedSegment { offset }));
        };

        self.pos += SEG_HDR_SIZE + header.length as usize;
        Some(Ok(Segment { header, offset, data }))
    }
}

impl Write for Segment<'_> {
    fn write(&self, w: &mut Writer) {
        let hdr = &self.header;
        let (sc, cmplt) = (hdr.sc as u8, hdr.cmplt as u8);
        w.write_u8(pack!((sc, 1), (cmplt, 1)));
        w.write_u8(hdr.length);
        if let Some(time_offset) = hdr.time_offset {
            w.write_u32::<3>(time_offset);
        }
        w.put(self.data);
    }
}

impl<'a> Segment<'a> {
    /// Segment starting an SDU, carrying its time offset.
    /// Panics when `data` exceeds 252 bytes.
    pub fn start(time_offset: u32, cmplt: bool, data: &'a [u8]) -> Self {
        let length = (SEG_TIMEOFFSET_SIZE + data.len()).try_into().unwrap();
        let header = SegmentHeader { sc: false, cmplt, length, time_offset: Some(time_offset) };
        Self { header, offset: 0, data }
    }

    /// Segment continuing an SDU.
    /// Panics when `data` exceeds 255 bytes.
    pub fn continuation(cmplt: bool, data: &'a [u8]) -> Self {
        let length = data.len().try_into().unwrap();
        let header = SegmentHeader { sc: true, cmplt, length, time_offset: None };
        Self { header, offset: 0, data }
    }

    /// Build a framed PDU payload from segments
    pub fn concat(segments: &[Segment]) -> Vec<u8> {
        let mut w = Writer::new(Vec::new());
        for segment in segments {
            w.write(segment);
        }
        w.into_vec()
    }
}

#[test]
fn test_pdu_header() {
    let dump = [0x1d, 0x03, 0xaa, 0xbb, 0xcc, 0xee];
    let Some(pdu) = IsoPdu::from_bytes(&dump) else { panic!() };
    assert_eq!(pdu.llid, Llid::UnframedStartContinue);
    assert_eq!(pdu.payload, &[0xaa, 0xbb, 0xcc]);

    assert!(IsoPdu::from_bytes(&[0x02, 0x04, 0x00]).is_none());
    assert!(IsoPdu::from_bytes(&[0x03, 0x00]).is_none());

    let pdu = IsoPdu::new(Llid::Framed, &[0x01, 0x00]);
    assert_eq!(pdu.to_bytes(), vec![0x02, 0x02, 0x01, 0x00]);
}

#[test]
fn test_segments() {
    let payload = [
        0x02, 0x05, 0x10, 0x27, 0x00, 0x11, 0x22, // start, complete, time offset 10000
        0x01, 0x01, 0x33, // continuation
    ];
    let segments: Vec<_> = Segments::new(&payload).collect();
    assert_eq!(segments.len(), 2);

    let Ok(first) = segments[0] else { panic!() };
    assert_eq!(
        first.header,
        SegmentHeader { sc: false, cmplt: true, length: 5, time_offset: Some(10_000) }
    );
    assert_eq!(first.data, &[0x11, 0x22]);

    let Ok(second) = segments[1] else { panic!() };
    assert_eq!(second.offset, 7);
    assert!(second.header.sc && !second.header.cmplt);
    assert_eq!(second.data, &[0x33]);

    let built = Segment::concat(&[
        Segment::start(10_000, true, &[0x11, 0x22]),
        Segment::continuation(false, &[0x33]),
    ]);
    assert_eq!(built, payload);
}

#[test]
fn test_malformed_segments() {
    // Length runs past the end of the payload
    let mut it = Segments::new(&[0x03, 0x04, 0x00]);
    assert_eq!(it.next().map(|s| s.err()), Some(Some(MalformedSegment { offset: 0 })));
    assert!(it.next().is_none());

    // Truncated header after a valid segment
    let mut it = Segments::new(&[0x01, 0x00, 0x01]);
    assert!(matches!(it.next(), Some(Ok(_))));
    assert_eq!(it.next().map(|s| s.err()), Some(Some(MalformedSegment { offset: 2 })));
    assert!(it.next().is_none());

    // Start segment too short for its time offset
    let mut it = Segments::new(&[0x02, 0x02, 0x00, 0x00]);
    assert!(matches!(it.next(), Some(Err(_))));

    assert!(Segments::new(&[]).next().is_none());
}
