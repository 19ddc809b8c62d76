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

use bitflags::bitflags;
use std::fmt;
use thiserror::Error;

bitflags! {
    /// Operational status of an ISO-AL operation.
    ///
    /// Statuses of the sub-steps of a recombination (allocation, writes, emits)
    /// are accumulated, the empty set meaning success.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Status: u8 {
        /// No free sink in the pool
        const ERR_SINK_ALLOC = 0x01;
        /// Sink disabled, or the SDU allocator failed
        const ERR_SDU_ALLOC = 0x02;
        /// The SDU emitter failed
        const ERR_SDU_EMIT = 0x04;
        /// Other failures reported by a collaborator, or undecodable input
        const ERR_UNSPECIFIED = 0x80;
    }
}

impl Status {
    /// Success
    pub const OK: Self = Self::empty();

    /// Returns true when no error bit is set
    pub fn is_ok(&self) -> bool {
        self.is_empty()
    }
}

bitflags! {
    /// Quality of a produced SDU, the empty set meaning valid data.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SduStatus: u8 {
        /// SDU contents may contain errors
        const ERRORS = 0x01;
        /// Part of the SDU was lost
        const LOST_DATA = 0x02;
    }
}

impl SduStatus {
    /// Valid data
    pub const VALID: Self = Self::empty();
}

/// Reception status of a PDU, as reported by the link layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PduStatus {
    #[default]
    Valid = 0x00,
    Errors = 0x01,
    LostData = 0x02,
}

impl From<PduStatus> for SduStatus {
    fn from(status: PduStatus) -> Self {
        SduStatus::from_bits_truncate(status as u8)
    }
}

/// Handle of a sink, index in the fixed-size sink pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkHandle(pub(crate) u8);

impl SinkHandle {
    /// Index of the sink in the pool
    pub fn index(&self) -> usize {
        self.0.into()
    }
}

impl fmt::Display for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

/// Errors of sink lifecycle operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// All sinks of the pool are taken
    #[error("no free sink, all {max} are allocated")]
    SinkAlloc { max: usize },

    /// The handle does not refer to an allocated sink
    #[error("{0} is not allocated")]
    InvalidHandle(SinkHandle),

    /// Timing parameters cannot produce a valid session
    #[error("invalid sink parameters: {0}")]
    InvalidParameters(&'static str),
}

impl Error {
    /// Operational status code corresponding to the error
    pub fn status(&self) -> Status {
        match self {
            Error::SinkAlloc { .. } => Status::ERR_SINK_ALLOC,
            Error::InvalidHandle(_) | Error::InvalidParameters(_) => Status::ERR_UNSPECIFIED,
        }
    }
}

#[test]
fn test_pdu_status_into_sdu_status() {
    assert_eq!(SduStatus::from(PduStatus::Valid), SduStatus::VALID);
    assert_eq!(SduStatus::from(PduStatus::Errors), SduStatus::ERRORS);
    assert_eq!(SduStatus::from(PduStatus::LostData), SduStatus::LOST_DATA);
}

#[test]
fn test_error_status() {
    assert_eq!(Error::SinkAlloc { max: 4 }.status(), Status::ERR_SINK_ALLOC);
    assert_eq!(Error::InvalidHandle(SinkHandle(2)).to_string(), "sink#2 is not allocated");
    assert!(Status::OK.is_ok());
    assert!(!(Status::OK | Status::ERR_SDU_EMIT).is_ok());
}
