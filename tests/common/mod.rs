//! Transforms used to observe what the pipelines do.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{Array2, Array3, Array4};
use rusty_ramp::data::model::{DataModel, ExposureMeta, Instrument, ModelKind, StepStatus};
use rusty_ramp::output::OutputManager;
use rusty_ramp::step::{BackgroundSubtraction, RampFit, StepSettings, Transform};
use rusty_ramp::Result;

/// Shared invocation counter.
#[derive(Debug, Clone, Default)]
pub struct Calls(Arc<AtomicUsize>);

impl Calls {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Marks the model and counts how often it ran.
pub struct Probe {
    name: String,
    settings: StepSettings,
    pub calls: Calls,
}

impl Probe {
    pub fn new(name: &str) -> (Self, Calls) {
        let calls = Calls::default();
        let probe = Self {
            name: name.to_string(),
            settings: StepSettings::new().with_param("p", 0i64),
            calls: calls.clone(),
        };
        (probe, calls)
    }
}

impl Transform for Probe {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, mut input: DataModel, _outputs: &mut OutputManager) -> Result<DataModel> {
        self.calls.hit();
        input.mark_step(&self.name, StepStatus::Complete);
        Ok(input)
    }

    fn as_background(&mut self) -> Option<&mut dyn BackgroundSubtraction> {
        Some(self)
    }
}

impl BackgroundSubtraction for Probe {
    fn subtract(
        &mut self,
        input: DataModel,
        _backgrounds: &[DataModel],
        outputs: &mut OutputManager,
    ) -> Result<DataModel> {
        self.process(input, outputs)
    }
}

/// Fit step returning fixed results.
pub struct FixedFit {
    settings: StepSettings,
    primary: Option<DataModel>,
    integrations: Option<DataModel>,
    pub calls: Calls,
}

impl FixedFit {
    pub fn new(primary: Option<DataModel>, integrations: Option<DataModel>) -> (Self, Calls) {
        let calls = Calls::default();
        let fit = Self {
            settings: StepSettings::new(),
            primary,
            integrations,
            calls: calls.clone(),
        };
        (fit, calls)
    }
}

impl Transform for FixedFit {
    fn name(&self) -> &str {
        "ramp_fit"
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, input: DataModel, _outputs: &mut OutputManager) -> Result<DataModel> {
        self.calls.hit();
        Ok(self.primary.clone().unwrap_or(input))
    }

    fn as_ramp_fit(&mut self) -> Option<&mut dyn RampFit> {
        Some(self)
    }
}

impl RampFit for FixedFit {
    fn fit_exposure(&mut self, _input: DataModel, _outputs: &mut OutputManager) -> Result<Option<DataModel>> {
        self.calls.hit();
        Ok(self.primary.clone())
    }

    fn fit_paired(
        &mut self,
        _input: DataModel,
        _outputs: &mut OutputManager,
    ) -> Result<(Option<DataModel>, Option<DataModel>)> {
        self.calls.hit();
        Ok((self.primary.clone(), self.integrations.clone()))
    }
}

/// Replaces the data with zeros, the way a real resampling would produce a
/// different array.
pub struct Scrambler {
    settings: StepSettings,
    pub calls: Calls,
}

impl Scrambler {
    pub fn new() -> (Self, Calls) {
        let calls = Calls::default();
        (
            Self {
                settings: StepSettings::new(),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl Transform for Scrambler {
    fn name(&self) -> &str {
        "resample"
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, mut input: DataModel, _outputs: &mut OutputManager) -> Result<DataModel> {
        self.calls.hit();
        input.data.fill(0.0);
        Ok(input)
    }
}

/// Gain scale stand-in that only accepts per-integration cubes.
pub struct CubeOnly {
    settings: StepSettings,
    pub calls: Calls,
}

impl CubeOnly {
    pub fn new() -> (Self, Calls) {
        let calls = Calls::default();
        (
            Self {
                settings: StepSettings::new(),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl Transform for CubeOnly {
    fn name(&self) -> &str {
        "gain_scale"
    }

    fn settings(&self) -> &StepSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut StepSettings {
        &mut self.settings
    }

    fn process(&mut self, mut input: DataModel, _outputs: &mut OutputManager) -> Result<DataModel> {
        self.calls.hit();
        input.require_kind(ModelKind::Cube)?;
        input.mark_step("gain_scale", StepStatus::Complete);
        Ok(input)
    }
}

pub fn meta(instrument: Instrument, exptype: &str, filename: &str) -> ExposureMeta {
    ExposureMeta::new(instrument, exptype).with_filename(filename)
}

pub fn uncal(instrument: Instrument) -> DataModel {
    let data = Array4::from_shape_fn((2, 3, 4, 4), |(i, g, r, c)| (i + g * 10 + r + c) as f32);
    DataModel::ramp(data, meta(instrument, "NIS_IMAGE", "jw_test_uncal.json"))
}

pub fn rate(value: f32, exptype: &str, filename: &str) -> DataModel {
    DataModel::image(
        Array2::from_elem((4, 4), value),
        meta(Instrument::Niriss, exptype, filename),
    )
}

pub fn rateints(value: f32, filename: &str) -> DataModel {
    DataModel::cube(
        Array3::from_elem((2, 4, 4), value),
        meta(Instrument::Niriss, "NIS_IMAGE", filename),
    )
}
