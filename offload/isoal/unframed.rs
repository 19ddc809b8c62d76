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

//! Recombination of unframed PDUs, Core Vol 6, Part G - 2.
//! Each PDU carries a fragment of a single SDU, and an SDU spans a fixed
//! number of PDUs, the last ones possibly being padding.

use crate::pdu::{Llid, PduRx};
use crate::production::{FsmState, SinkState};
use crate::status::{PduStatus, SduStatus, Status};

impl SinkState {
    /// Consume an unframed PDU, the destination may hold a partially built SDU
    pub(crate) fn unframed_consume(&mut self, pdu: &PduRx) -> Status {
        let llid = pdu.pdu.llid;
        let pdu_err = pdu.meta.status != PduStatus::Valid;
        let pdu_padding = pdu.pdu.payload.is_empty() && llid == Llid::UnframedStartContinue;
        let fsm = self.production.unframed_fsm;

        let seq_err = if fsm == FsmState::Start {
            self.start_sdu(pdu.meta.timestamp.wrapping_add(self.session.latency_unframed));
            self.production.pdu_cnt = 1;
            false
        } else {
            self.production.pdu_cnt = self.production.pdu_cnt.wrapping_add(1);
            pdu.meta.payload_number != self.production.prev_pdu_id.wrapping_add(1)
        };

        let last_pdu = u32::from(self.production.pdu_cnt) == self.session.pdus_per_sdu;
        let end_of_packet = llid == Llid::UnframedCompleteEnd || last_pdu;

        let next_state = match fsm {
            FsmState::Start | FsmState::Continue => match llid {
                _ if pdu_err || seq_err => FsmState::ErrSpool,
                // Last PDU without end fragment, the SDU is closed with errors
                Llid::UnframedStartContinue if last_pdu => FsmState::Start,
                Llid::UnframedStartContinue => FsmState::Continue,
                Llid::UnframedCompleteEnd if last_pdu => FsmState::Start,
                // Padding expected until the last PDU of the SDU
                Llid::UnframedCompleteEnd => FsmState::ErrSpool,
                Llid::Framed => unreachable!(),
            },
            FsmState::ErrSpool if last_pdu => FsmState::Start,
            FsmState::ErrSpool => FsmState::ErrSpool,
        };

        if pdu_err && !pdu_padding {
            self.production.sdu_status |= SduStatus::from(pdu.meta.status);
        } else if last_pdu && llid != Llid::UnframedCompleteEnd && fsm != FsmState::ErrSpool {
            self.production.sdu_status |= SduStatus::ERRORS;
        } else if seq_err {
            log::warn!(
                "{}: payload {} received after {}",
                self.session.sink(),
                pdu.meta.payload_number,
                self.production.prev_pdu_id
            );
            self.production.sdu_status |= SduStatus::LOST_DATA;
        }

        let status = match fsm {
            FsmState::ErrSpool => Status::OK,
            _ if pdu_err || seq_err => {
                // Errored padding is not accounted above, flag the cut SDU
                if pdu_err && pdu_padding {
                    self.production.sdu_status |= SduStatus::from(pdu.meta.status);
                }
                self.flush_sdu(pdu)
            }
            _ if !pdu_padding => self.append_to_sdu(pdu, pdu.pdu.payload, end_of_packet),
            _ if end_of_packet => self.flush_sdu(pdu),
            _ => Status::OK,
        };

        if fsm != next_state {
            log::trace!("{}: unframed {:?} -> {:?}", self.session.sink(), fsm, next_state);
        }
        self.production.unframed_fsm = next_state;
        self.production.prev_pdu_id = pdu.meta.payload_number;
        status
    }
}
