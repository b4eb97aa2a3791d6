//! Fixed, versioned, little-endian wire types for boundary exchange payloads.
//!
//! A rank-to-rank message is a [`WireHdr`] followed by one segment per
//! `(from, to)` domain pair, in ascending pair order. Each segment starts with
//! a [`WirePairHdr`]; what follows depends on the payload kind. Every field,
//! including array values, is little-endian.

use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Payload kinds carried in [`WireHdr::kind`].
pub mod kind {
    pub const MESH: u16 = 1;
    pub const ARRAY: u16 = 2;
    pub const MATERIAL: u16 = 3;
    pub const MIX_VAR: u16 = 4;
    pub const DOMAIN_LIST: u16 = 5;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub segments_le: u32,
}

impl WireHdr {
    pub fn new(kind: u16, segments: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            segments_le: (segments as u32).to_le(),
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn segments(&self) -> usize {
        u32::from_le(self.segments_le) as usize
    }
}

/// Byte length prefix used by the size stage of an exchange.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireLen {
    pub n_le: u64,
}

impl WireLen {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// Segment header: which pair, and how many records follow.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WirePairHdr {
    pub from_le: u32,
    pub to_le: u32,
    pub count_le: u32,
    pub aux_le: u32,
}

impl WirePairHdr {
    pub fn new(from: u32, to: u32, count: usize, aux: u32) -> Self {
        Self {
            from_le: from.to_le(),
            to_le: to.to_le(),
            count_le: (count as u32).to_le(),
            aux_le: aux.to_le(),
        }
    }
    pub fn from(&self) -> u32 {
        u32::from_le(self.from_le)
    }
    pub fn to(&self) -> u32 {
        u32::from_le(self.to_le)
    }
    pub fn count(&self) -> usize {
        u32::from_le(self.count_le) as usize
    }
    pub fn aux(&self) -> u32 {
        u32::from_le(self.aux_le)
    }
}

/// A point coordinate triple, as IEEE-754 bit patterns.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCoord {
    pub xyz_le: [u64; 3],
}

impl WireCoord {
    pub fn new(p: [f64; 3]) -> Self {
        Self {
            xyz_le: [
                p[0].to_bits().to_le(),
                p[1].to_bits().to_le(),
                p[2].to_bits().to_le(),
            ],
        }
    }
    pub fn get(&self) -> [f64; 3] {
        [
            f64::from_bits(u64::from_le(self.xyz_le[0])),
            f64::from_bits(u64::from_le(self.xyz_le[1])),
            f64::from_bits(u64::from_le(self.xyz_le[2])),
        ]
    }
}

/// Cell header; `n_points` connectivity entries ([`WireConn`]) follow.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCellHdr {
    pub cell_type: u8,
    pub _pad: [u8; 3],
    pub n_points_le: u32,
}

impl WireCellHdr {
    pub fn new(cell_type: u8, n_points: usize) -> Self {
        Self {
            cell_type,
            _pad: [0; 3],
            n_points_le: (n_points as u32).to_le(),
        }
    }
    pub fn n_points(&self) -> usize {
        u32::from_le(self.n_points_le) as usize
    }
}

/// One connectivity entry of a given cell, in the receiver's terms:
/// `>= 0` is a receiver-local (shared) point id, `< 0` is `-(k + 1)` for the
/// `k`-th given point of the segment.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireConn {
    pub id_le: i64,
}

impl WireConn {
    pub fn shared(local: usize) -> Self {
        Self {
            id_le: (local as i64).to_le(),
        }
    }
    pub fn given(k: usize) -> Self {
        Self {
            id_le: (-(k as i64) - 1).to_le(),
        }
    }
    pub fn decode(&self) -> ConnRef {
        let v = i64::from_le(self.id_le);
        if v >= 0 {
            ConnRef::Shared(v as usize)
        } else {
            ConnRef::Given((-v - 1) as usize)
        }
    }
}

/// Decoded [`WireConn`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnRef {
    Shared(usize),
    Given(usize),
}

/// Material entry of one given zone: `>= 0` clean material, `< 0` is
/// `-(n)` meaning `n` [`WireMix`] records follow in the mix block.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireZoneMat {
    pub v_le: i32,
}

impl WireZoneMat {
    pub fn clean(mat: i32) -> Self {
        Self { v_le: mat.to_le() }
    }
    pub fn mixed(n: usize) -> Self {
        Self {
            v_le: (-(n as i32)).to_le(),
        }
    }
    pub fn get(&self) -> i32 {
        i32::from_le(self.v_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMix {
    pub mat_le: i32,
    pub vf_bits_le: u32,
}

impl WireMix {
    pub fn new(mat: i32, vf: f32) -> Self {
        Self {
            mat_le: mat.to_le(),
            vf_bits_le: vf.to_bits().to_le(),
        }
    }
    pub fn material(&self) -> i32 {
        i32::from_le(self.mat_le)
    }
    pub fn volume_fraction(&self) -> f32 {
        f32::from_bits(u32::from_le(self.vf_bits_le))
    }
}

// ===== Encoding helpers ====================================================

/// Append-only payload builder.
#[derive(Default, Debug)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Pod>(&mut self, rec: T) {
        self.buf.extend_from_slice(bytemuck::bytes_of(&rec));
    }

    pub fn put_slice<T: Pod>(&mut self, recs: &[T]) {
        self.buf.extend_from_slice(bytemuck::cast_slice(recs));
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked cursor over a received payload. Reads are alignment-free.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                format!(
                    "payload truncated: need {n} bytes at offset {}, have {}",
                    self.pos,
                    self.buf.len()
                )
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn get<T: Pod>(&mut self) -> Result<T, String> {
        let bytes = self.take(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn get_vec<T: Pod>(&mut self, n: usize) -> Result<Vec<T>, String> {
        if size_of::<T>() == 0 {
            return Ok(vec![T::zeroed(); n]);
        }
        let len = n
            .checked_mul(size_of::<T>())
            .ok_or_else(|| format!("element count {n} overflows"))?;
        let bytes = self.take(len)?;
        Ok(bytes
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos == self.buf.len()
    }

    /// Read and check the message header.
    pub fn header(&mut self, expected_kind: u16) -> Result<WireHdr, String> {
        let hdr: WireHdr = self.get()?;
        if hdr.version() != WIRE_VERSION {
            return Err(format!(
                "wire version {} (expected {WIRE_VERSION})",
                hdr.version()
            ));
        }
        if hdr.kind() != expected_kind {
            return Err(format!(
                "payload kind {} (expected {expected_kind})",
                hdr.kind()
            ));
        }
        Ok(hdr)
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    assert!(size_of::<WireHdr>() == 8);
    assert!(size_of::<WireLen>() == 8);
    assert!(size_of::<WirePairHdr>() == 16);
    assert!(size_of::<WireCoord>() == 24);
    assert!(size_of::<WireCellHdr>() == 8);
    assert!(size_of::<WireConn>() == 8);
    assert!(size_of::<WireZoneMat>() == 4);
    assert!(size_of::<WireMix>() == 8);
};
