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

//! Recombination of framed PDUs, Core Vol 6, Part G - 6.
//! A PDU carries a sequence of segments, each starting, continuing or
//! completing an SDU, so that a PDU can yield several SDUs.

use crate::pdu::{PduRx, Segment};
use crate::production::{FsmState, SinkState};
use crate::status::{PduStatus, SduStatus, Status};

impl SinkState {
    /// Consume a framed PDU, the destination may hold a partially built SDU
    pub(crate) fn framed_consume(&mut self, pdu: &PduRx) -> Status {
        let pdu_err = pdu.meta.status != PduStatus::Valid;
        let pdu_padding = pdu.pdu.payload.is_empty();
        let seq_err = self.production.framed_fsm != FsmState::Start
            && pdu.meta.payload_number != self.production.prev_pdu_id.wrapping_add(1);

        let mut status = Status::OK;

        if pdu_err || seq_err {
            // When PDUs are not received, all SDUs affected by the missing
            // PDUs may be discarded, the partial SDU is delivered flagged.
            if pdu_err {
                self.production.sdu_status |= SduStatus::from(pdu.meta.status);
            } else {
                log::warn!(
                    "{}: payload {} received after {}",
                    self.session.sink(),
                    pdu.meta.payload_number,
                    self.production.prev_pdu_id
                );
                self.production.sdu_status |= SduStatus::LOST_DATA;
            }
            status |= self.framed_abort_sdu(pdu);
        } else if !pdu_padding {
            for segment in pdu.pdu.segments() {
                match segment {
                    Ok(segment) => status |= self.framed_consume_segment(pdu, &segment),
                    Err(err) => {
                        log::warn!("{}: {}", self.session.sink(), err);
                        self.production.sdu_status |= SduStatus::ERRORS;
                        status |= self.framed_abort_sdu(pdu);
                    }
                }
            }
        }

        self.production.prev_pdu_id = pdu.meta.payload_number;
        status
    }

    fn framed_consume_segment(&mut self, pdu: &PduRx, segment: &Segment) -> Status {
        let fsm = self.production.framed_fsm;
        let (sc, cmplt) = (segment.header.sc, segment.header.cmplt);

        let next_state = match (fsm, sc, cmplt) {
            // Start of a new SDU, completed in following PDUs
            (FsmState::Start | FsmState::ErrSpool, false, false) => FsmState::Continue,
            // Start of a new SDU, complete in this PDU
            (FsmState::Start | FsmState::ErrSpool, false, true) => FsmState::Start,
            (FsmState::Continue, true, false) => FsmState::Continue,
            (FsmState::Continue, true, true) => FsmState::Start,
            // Continuation of an SDU already discarded
            (FsmState::ErrSpool, true, _) => return Status::OK,
            (fsm, sc, cmplt) => {
                panic!(
                    "{}: unexpected segment sc={} cmplt={} in state {:?}",
                    self.session.sink(),
                    sc,
                    cmplt,
                    fsm
                )
            }
        };

        if !sc {
            let time_offset = segment.header.time_offset.unwrap_or_default();
            if fsm == FsmState::ErrSpool {
                log::debug!("{}: resynchronized on SDU start", self.session.sink());
            }
            self.start_sdu(
                pdu.meta
                    .timestamp
                    .wrapping_add(self.session.latency_framed)
                    .wrapping_sub(time_offset),
            );
        }

        let status = self.append_to_sdu(pdu, segment.data, cmplt);
        self.production.framed_fsm = next_state;
        status
    }

    /// Abandon the SDU in progress, delivering what has been received
    fn framed_abort_sdu(&mut self, pdu: &PduRx) -> Status {
        let status = match self.production.framed_fsm {
            FsmState::Continue => self.flush_sdu(pdu),
            FsmState::Start | FsmState::ErrSpool => Status::OK,
        };
        self.production.framed_fsm = FsmState::ErrSpool;
        status
    }
}
