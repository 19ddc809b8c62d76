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

/// Bounds-checked cursor over a little-endian byte stream
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed
    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn get(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.remaining() {
            return None;
        }
        let old_pos = self.pos;
        self.pos += n;
        Some(&self.data[old_pos..self.pos])
    }

    pub(crate) fn read_u8(&mut self) -> Option<u8> {
        Some(self.read_u32::<1>()? as u8)
    }

    pub(crate) fn read_u16(&mut self) -> Option<u16> {
        Some(self.read_u32::<2>()? as u16)
    }

    pub(crate) fn read_u32<const N: usize>(&mut self) -> Option<u32> {
        let data_it = self.get(N)?.iter().enumerate();
        Some(data_it.fold(0u32, |v, (i, byte)| v | (*byte as u32) << (i * 8)))
    }
}

/// Split a value into bit fields, LSB first
macro_rules! unpack {
    ($v:expr, ($( $n:expr ),*)) => {
        {
            let mut _x = $v;
            ($({
                let y = _x & ((1 << $n) - 1);
                _x >>= $n;
                y
            }),*)
        }
    };
    ($v:expr, $n:expr) => { unpack!($v, ($n)) };
}

pub(crate) use unpack;

#[test]
fn test_reader_bounds() {
    let mut r = Reader::new(&[0x34, 0x12, 0x56, 0x78, 0x9a]);
    assert_eq!(r.read_u16(), Some(0x1234));
    assert_eq!(r.read_u32::<3>(), None);
    assert_eq!(r.remaining(), 3);
    assert_eq!(r.read_u32::<3>(), Some(0x9a7856));
    assert_eq!(r.read_u8(), None);
}

#[test]
fn test_unpack() {
    let (sc, cmplt, rfu) = unpack!(0b1111_1110u8, (1, 1, 6));
    assert_eq!((sc, cmplt, rfu), (0, 1, 0b111111));
}
