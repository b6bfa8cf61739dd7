use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Truth-level metadata for one simulated particle in a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub particle_idx: u32,
    pub primary: bool,
    pub pdg_code: i32,
    pub mass: f32,
    pub creation: [f32; 3],
    pub direction: [f32; 3],
    pub start: [f32; 3],
    pub end: [f32; 3],
    pub creation_energy: f32,
    pub creation_momentum: f32,
    pub deposited_energy: f32,
    /// Number of voxels the particle deposited into.
    pub npx: u32,
    pub creation_process: String,
    pub category: ParticleCategory,
}

/// Coarse semantic class used as a segmentation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleCategory {
    Proton,
    Track,
    Shower,
    DeltaRay,
    MichelElectron,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unidentified creation process {process:?} for pdg {pdg_code}")]
pub struct UnknownProcess {
    pub pdg_code: i32,
    pub process: String,
}

impl ParticleCategory {
    pub fn classify(pdg_code: i32, creation_process: &str) -> Result<Self, UnknownProcess> {
        match pdg_code {
            2212 | -2212 => Ok(Self::Proton),
            22 => Ok(Self::Shower),
            11 | -11 => match creation_process {
                "primary" | "nCapture" | "conv" | "compt" => Ok(Self::Shower),
                "muIoni" | "hIoni" => Ok(Self::DeltaRay),
                "muMinusCaptureAtRest" | "muPlusCaptureAtRest" | "Decay" => {
                    Ok(Self::MichelElectron)
                }
                other => Err(UnknownProcess {
                    pdg_code,
                    process: other.to_string(),
                }),
            },
            _ => Ok(Self::Track),
        }
    }

    /// Numeric class id as stored in label tensors.
    pub fn class_id(self) -> u8 {
        match self {
            Self::Proton => 0,
            Self::Track => 1,
            Self::Shower => 2,
            Self::DeltaRay => 3,
            Self::MichelElectron => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_follows_pdg_then_process() {
        assert_eq!(
            ParticleCategory::classify(-2212, "anything"),
            Ok(ParticleCategory::Proton)
        );
        assert_eq!(
            ParticleCategory::classify(13, "primary"),
            Ok(ParticleCategory::Track)
        );
        assert_eq!(
            ParticleCategory::classify(22, "whatever"),
            Ok(ParticleCategory::Shower)
        );
        assert_eq!(
            ParticleCategory::classify(11, "compt"),
            Ok(ParticleCategory::Shower)
        );
        assert_eq!(
            ParticleCategory::classify(-11, "hIoni"),
            Ok(ParticleCategory::DeltaRay)
        );
        assert_eq!(
            ParticleCategory::classify(11, "Decay").map(ParticleCategory::class_id),
            Ok(4)
        );
    }

    #[test]
    fn classify_rejects_unknown_em_process() {
        let err = ParticleCategory::classify(11, "eBrem").unwrap_err();
        assert_eq!(err.process, "eBrem");
    }
}
