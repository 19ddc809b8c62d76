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

//! Receive side of the LE Audio ISO Adaptation Layer (ISO-AL)
//!
//! Isochronous PDUs received on a CIS or BIS are recombined into SDUs,
//! timestamped and sequenced, then handed to platform callbacks:
//!
//!     PDU        ________________________________         SDU
//!   --------->  |  sink  : unframed | framed     |  ---------------> emit
//!   recombine   |        : FSM      | FSM        |   alloc / write
//!               |________:__________|____________|
//!                        ^
//!                        | create / enable / disable / destroy
//!
//! A sink is created for each received stream, from the timing parameters
//! negotiated for it. Unframed PDUs carry one fragment of an SDU, an SDU
//! spanning a fixed number of PDUs. Framed PDUs carry segments, each with
//! its own header.
//!
//! Received PDUs with errors or gaps never stop the production: the SDU in
//! progress is delivered flagged, and the sink resynchronizes on the next
//! SDU boundary.

mod framed;
mod hci;
mod pdu;
mod production;
mod reader;
mod session;
mod sink;
mod status;
mod unframed;
mod writer;

pub mod utils;


pub use hci::*;
pub use pdu::{IsoPdu, Llid, MalformedSegment, PduMeta, PduRx, Segment, SegmentHeader, Segments};
pub use pdu::{SEG_HDR_SIZE, SEG_TIMEOFFSET_SIZE};
pub use session::*;
pub use sink::{Isoal, ISOAL_SINKS_MAX};
pub use status::*;
