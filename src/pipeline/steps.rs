//! Step names and the default order each stage runs them in.

use std::fmt;

use crate::data::model::Instrument;

// Stage 1 (detector)
pub const GROUP_SCALE: &str = "group_scale";
pub const DQ_INIT: &str = "dq_init";
pub const SATURATION: &str = "saturation";
pub const IPC: &str = "ipc";
pub const NOISE_CORRECTION: &str = "noise_correction";
pub const SUPERBIAS: &str = "superbias";
pub const REFPIX: &str = "refpix";
pub const LINEARITY: &str = "linearity";
pub const PERSISTENCE: &str = "persistence";
pub const DARK_CURRENT: &str = "dark_current";
pub const FIRSTFRAME: &str = "firstframe";
pub const LASTFRAME: &str = "lastframe";
pub const RESET: &str = "reset";
pub const RSCD: &str = "rscd";
pub const JUMP: &str = "jump";
pub const RAMP_FIT: &str = "ramp_fit";
pub const GAIN_SCALE: &str = "gain_scale";

// Stage 2 (imaging)
pub const BKG_SUBTRACT: &str = "bkg_subtract";
pub const ASSIGN_WCS: &str = "assign_wcs";
pub const FLAT_FIELD: &str = "flat_field";
pub const PHOTOM: &str = "photom";
pub const RESAMPLE: &str = "resample";

/// Exposure types the resample sub-step accepts.
pub const IMAGE_EXPTYPES: [&str; 4] = ["MIR_IMAGE", "NRC_IMAGE", "NIS_IMAGE", "FGS_IMAGE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Detector1,
    Image2,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Detector1 => f.write_str("Detector1"),
            Stage::Image2 => f.write_str("Image2"),
        }
    }
}

/// Ordered step names to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepList(Vec<String>);

impl StepList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|s| s == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for StepList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        StepList(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<String>> for StepList {
    fn from(names: Vec<String>) -> Self {
        StepList(names)
    }
}

impl From<Vec<&str>> for StepList {
    fn from(names: Vec<&str>) -> Self {
        names.into_iter().collect()
    }
}

impl fmt::Display for StepList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// The step order a stage runs when the caller gives none.
///
/// MIRI has its own detector sequence and no column noise correction. For
/// every other instrument the noise step sits right after `ipc`, and
/// `persistence` is left out for NIRSpec.
pub fn default_step_list(instrument: Instrument, stage: Stage) -> StepList {
    match stage {
        Stage::Detector1 => {
            let mut steps = match instrument {
                Instrument::Miri => vec![
                    GROUP_SCALE,
                    DQ_INIT,
                    SATURATION,
                    IPC,
                    FIRSTFRAME,
                    LASTFRAME,
                    RESET,
                    LINEARITY,
                    RSCD,
                    DARK_CURRENT,
                    REFPIX,
                ],
                _ => {
                    let mut steps = vec![
                        GROUP_SCALE,
                        DQ_INIT,
                        SATURATION,
                        IPC,
                        NOISE_CORRECTION,
                        SUPERBIAS,
                        REFPIX,
                        LINEARITY,
                    ];
                    if instrument != Instrument::Nirspec {
                        steps.push(PERSISTENCE);
                    }
                    steps.push(DARK_CURRENT);
                    steps
                }
            };
            steps.extend([JUMP, RAMP_FIT, GAIN_SCALE]);
            steps.into()
        }
        Stage::Image2 => vec![BKG_SUBTRACT, ASSIGN_WCS, FLAT_FIELD, PHOTOM, RESAMPLE].into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Instrument; 5] = [
        Instrument::Nircam,
        Instrument::Niriss,
        Instrument::Nirspec,
        Instrument::Miri,
        Instrument::Fgs,
    ];

    fn position(steps: &StepList, name: &str) -> Option<usize> {
        steps.iter().position(|s| s == name)
    }

    #[test]
    fn noise_step_follows_ipc_and_precedes_superbias() {
        for instrument in ALL.into_iter().filter(|i| *i != Instrument::Miri) {
            let steps = default_step_list(instrument, Stage::Detector1);
            assert_eq!(
                steps.iter().filter(|s| *s == NOISE_CORRECTION).count(),
                1,
                "{instrument}"
            );
            let noise = position(&steps, NOISE_CORRECTION).unwrap();
            assert!(position(&steps, IPC).unwrap() < noise, "{instrument}");
            assert!(noise < position(&steps, SUPERBIAS).unwrap(), "{instrument}");
        }
    }

    #[test]
    fn miri_never_gets_noise_step() {
        let steps = default_step_list(Instrument::Miri, Stage::Detector1);
        assert!(!steps.contains(NOISE_CORRECTION));
        assert!(steps.contains(RSCD));
        assert!(!steps.contains(SUPERBIAS));
    }

    #[test]
    fn nirspec_drops_persistence() {
        assert!(!default_step_list(Instrument::Nirspec, Stage::Detector1).contains(PERSISTENCE));
        assert!(default_step_list(Instrument::Nircam, Stage::Detector1).contains(PERSISTENCE));
    }

    #[test]
    fn detector_lists_end_with_fit_and_gain() {
        for instrument in ALL {
            let steps: Vec<_> = default_step_list(instrument, Stage::Detector1)
                .iter()
                .map(str::to_string)
                .collect();
            assert_eq!(steps[steps.len() - 3..], [JUMP, RAMP_FIT, GAIN_SCALE]);
        }
    }

    #[test]
    fn image2_default_is_instrument_independent() {
        let expected: StepList = [BKG_SUBTRACT, ASSIGN_WCS, FLAT_FIELD, PHOTOM, RESAMPLE]
            .into_iter()
            .collect();
        for instrument in ALL {
            assert_eq!(default_step_list(instrument, Stage::Image2), expected);
        }
    }
}
