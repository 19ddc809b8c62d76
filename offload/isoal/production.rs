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
use crate::session::{SduFragment, SduProduced, Session};
use crate::status::{PduStatus, SduStatus, Status};

/// State of a recombination state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum FsmState {
    /// Next PDU (or segment) starts a new SDU
    #[default]
    Start,
    /// An SDU is in progress
    Continue,
    /// Discard data until the next point of synchronization
    ErrSpool,
}

/// Bookkeeping of the SDU production, cleared when the sink is enabled
#[derive(Debug, Default)]
pub(crate) struct SduProduction {
    /// Descriptor of the SDU in the current destination buffer
    pub(crate) sdu: SduProduced,
    /// Bytes written in the destination buffer
    pub(crate) sdu_written: usize,
    /// Bytes left in the destination buffer, 0 when no buffer is open
    pub(crate) sdu_available: usize,
    /// Fragment position of the next emitted chunk, `Start` or `Cont`
    pub(crate) sdu_state: SduFragment,
    /// Status accumulated over the SDU
    pub(crate) sdu_status: SduStatus,
    /// Synchronization reference of the SDU in progress
    pub(crate) sdu_timestamp: u32,
    pub(crate) unframed_fsm: FsmState,
    pub(crate) framed_fsm: FsmState,
    /// PDUs consumed for the SDU in progress (unframed), wraps at 256
    pub(crate) pdu_cnt: u8,
    /// Payload number of the last PDU consumed
    pub(crate) prev_pdu_id: u64,
}

/// State of an allocated sink
pub(crate) struct SinkState {
    pub(crate) session: Session,
    pub(crate) production: SduProduction,
}

impl SinkState {
    pub(crate) fn new(session: Session) -> Self {
        Self { session, production: Default::default() }
    }

    /// Begin a new SDU: next sequence number, clean status, first fragment
    pub(crate) fn start_sdu(&mut self, timestamp: u32) {
        let production = &mut self.production;
        production.sdu_status = SduStatus::VALID;
        production.sdu_state = SduFragment::Start;
        production.sdu_timestamp = timestamp;
        self.session.seqn = self.session.seqn.wrapping_add(1);
    }

    /// Open a destination buffer, when the previous one has been emitted
    fn allocate_sdu(&mut self, pdu: &PduRx) -> Status {
        let production = &mut self.production;
        if production.sdu_available != 0 {
            return Status::OK;
        }

        let contents = match self.session.callbacks.sdu_alloc(&self.session, pdu) {
            Ok(contents) => contents,
            Err(status) => {
                log::warn!("{}: SDU allocation failed: {:?}", self.session.sink(), status);
                return Status::ERR_SDU_ALLOC | status;
            }
        };
        assert!(contents.size > 0, "{}: allocated SDU buffer is empty", self.session.sink());

        production.sdu_written = 0;
        production.sdu_available = contents.size;

        let sdu = &mut production.sdu;
        sdu.contents = contents;
        sdu.status = pdu.meta.status.into();
        sdu.timestamp = production.sdu_timestamp;
        sdu.seqn = self.session.seqn;
        Status::OK
    }

    /// Emit the destination buffer when full, or when the SDU ends
    fn try_emit_sdu(&mut self, end_of_sdu: bool) -> Status {
        let production = &mut self.production;
        let sdu_complete = production.sdu_available == 0 || end_of_sdu;

        if end_of_sdu {
            production.sdu_available = 0;
        }
        if !sdu_complete {
            return Status::OK;
        }

        let (fragment, next_state) = match (production.sdu_state, end_of_sdu) {
            (SduFragment::Start, true) => (SduFragment::Single, SduFragment::Start),
            (SduFragment::Start, false) => (SduFragment::Start, SduFragment::Cont),
            (SduFragment::Cont, true) => (SduFragment::End, SduFragment::Start),
            (SduFragment::Cont, false) => (SduFragment::Cont, SduFragment::Cont),
            (state @ (SduFragment::End | SduFragment::Single), _) => {
                panic!("{}: SDU fragment state {:?} is not resumable", self.session.sink(), state)
            }
        };

        let sdu = &mut production.sdu;
        sdu.fragment = fragment;
        sdu.written = production.sdu_written;
        sdu.status = production.sdu_status;
        let status = self.session.callbacks.sdu_emit(&self.session, sdu);

        production.sdu_state = next_state;
        status
    }

    /// Copy `data` into destination buffers, emitting each buffer filled.
    /// With `is_end_fragment` the SDU is closed once `data` is consumed,
    /// even when `data` is empty.
    pub(crate) fn append_to_sdu(
        &mut self,
        pdu: &PduRx,
        data: &[u8],
        is_end_fragment: bool,
    ) -> Status {
        let mut status = Status::OK;
        let mut remaining = data;

        // An empty fragment closing the SDU still has to be emitted
        let mut handle_error_case = is_end_fragment && remaining.is_empty();

        while !remaining.is_empty() || handle_error_case {
            status |= self.allocate_sdu(pdu);
            if self.production.sdu_available == 0 {
                self.production.sdu_status |= SduStatus::LOST_DATA;
                break;
            }

            let production = &mut self.production;
            let consume_len = remaining.len().min(production.sdu_available);
            if consume_len > 0 {
                let (chunk, rest) = remaining.split_at(consume_len);
                if pdu.meta.status == PduStatus::Valid {
                    status |= self.session.callbacks.sdu_write(
                        &production.sdu.contents,
                        production.sdu_written,
                        chunk,
                    );
                }
                production.sdu_written += consume_len;
                production.sdu_available -= consume_len;
                remaining = rest;
            }

            let end_of_sdu = remaining.is_empty() && is_end_fragment;
            status |= self.try_emit_sdu(end_of_sdu);
            handle_error_case = false;
        }

        status
    }

    /// Close the SDU in progress, with the data received so far
    pub(crate) fn flush_sdu(&mut self, pdu: &PduRx) -> Status {
        self.append_to_sdu(pdu, &[], true)
    }
}
