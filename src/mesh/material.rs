//! Per-zone material assignment with mixed (multi-material) zones.
//!
//! `matlist[z] >= 0` is the single material of a clean zone. A negative entry
//! `-(m + 1)` points at slot `m` of the mixed arrays, where the zone's
//! components form a chain through `mix_next` (1-based, 0 terminates).

use crate::mesh_error::GhostError;

/// One component of a mixed zone.
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MixComponent {
    pub material: i32,
    pub volume_fraction: f32,
    /// Index into the mixed arrays.
    pub slot: usize,
}

#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Material {
    pub names: Vec<String>,
    pub matlist: Vec<i32>,
    pub mix_mat: Vec<i32>,
    pub mix_vf: Vec<f32>,
    pub mix_next: Vec<i32>,
    pub mix_zone: Vec<i32>,
}

impl Material {
    /// All zones clean.
    pub fn clean(names: Vec<String>, matlist: Vec<i32>) -> Self {
        Self {
            names,
            matlist,
            ..Self::default()
        }
    }

    pub fn num_materials(&self) -> usize {
        self.names.len()
    }

    pub fn num_zones(&self) -> usize {
        self.matlist.len()
    }

    pub fn mix_len(&self) -> usize {
        self.mix_mat.len()
    }

    pub fn has_mixed(&self) -> bool {
        self.matlist.iter().any(|&m| m < 0)
    }

    /// Components of `zone`; a clean zone yields one component with fraction 1
    /// and `slot == usize::MAX`.
    pub fn zone_components(&self, zone: usize) -> Result<Vec<MixComponent>, GhostError> {
        let entry = *self.matlist.get(zone).ok_or(GhostError::IndexOutOfRange {
            index: zone,
            len: self.matlist.len(),
        })?;
        if entry >= 0 {
            return Ok(vec![MixComponent {
                material: entry,
                volume_fraction: 1.0,
                slot: usize::MAX,
            }]);
        }
        let mut out = Vec::new();
        let mut slot = (-entry - 1) as usize;
        loop {
            if slot >= self.mix_mat.len() || out.len() > self.mix_mat.len() {
                return Err(GhostError::IndexOutOfRange {
                    index: slot,
                    len: self.mix_mat.len(),
                });
            }
            out.push(MixComponent {
                material: self.mix_mat[slot],
                volume_fraction: self.mix_vf[slot],
                slot,
            });
            let next = self.mix_next[slot];
            if next <= 0 {
                break;
            }
            slot = (next - 1) as usize;
        }
        Ok(out)
    }

    /// Material with the largest volume fraction in `zone` (lowest id on ties).
    pub fn dominant_material(&self, zone: usize) -> Result<i32, GhostError> {
        let comps = self.zone_components(zone)?;
        let best = comps
            .iter()
            .fold(None::<MixComponent>, |best, c| match best {
                Some(b)
                    if b.volume_fraction > c.volume_fraction
                        || (b.volume_fraction == c.volume_fraction && b.material <= c.material) =>
                {
                    Some(b)
                }
                _ => Some(*c),
            });
        Ok(best.map(|c| c.material).unwrap_or(0))
    }

    pub fn push_clean_zone(&mut self, material: i32) {
        self.matlist.push(material);
    }

    /// Append a mixed zone; returns the first mixed slot used.
    pub fn push_mixed_zone(&mut self, components: &[(i32, f32)]) -> usize {
        let zone = self.matlist.len() as i32;
        let start = self.mix_mat.len();
        for (k, &(mat, vf)) in components.iter().enumerate() {
            self.mix_mat.push(mat);
            self.mix_vf.push(vf);
            self.mix_zone.push(zone);
            let next = if k + 1 < components.len() {
                (start + k + 2) as i32
            } else {
                0
            };
            self.mix_next.push(next);
        }
        self.matlist.push(-(start as i32) - 1);
        start
    }
}

/// A variable that carries one value per mixed slot of a [`Material`].
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MixedVariable {
    pub name: String,
    pub values: Vec<f32>,
}

impl MixedVariable {
    pub fn new(name: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}
