use std::path::Path;

use anyhow::{Context, Result};
use ndarray::Array4;
use serde_json::json;

use rusty_ramp::data::loader::save_model;
use rusty_ramp::data::model::{DataModel, ExposureMeta, Instrument};

const NINTS: usize = 2;
const NGROUPS: usize = 5;
const NROWS: usize = 32;
const NCOLS: usize = 32;

/// Counts accumulated per group by a pixel with unit flux.
const FLUX_PER_GROUP: f64 = 100.0;

fn generate_ramp(instrument: Instrument, stripe_level: f64, rng: &mut SimpleRng) -> Array4<f32> {
    let mut data = Array4::<f32>::zeros((NINTS, NGROUPS, NROWS, NCOLS));
    // A faint source in the middle of the frame.
    let (cy, cx) = (NROWS as f64 / 2.0, NCOLS as f64 / 2.0);
    let flux = |r: usize, c: usize| {
        let d2 = (r as f64 - cy).powi(2) + (c as f64 - cx).powi(2);
        1.0 + 5.0 * (-d2 / 8.0).exp()
    };
    // MIRI ramps are kept free of column noise.
    let stripes = instrument != Instrument::Miri;

    for i in 0..NINTS {
        for g in 0..NGROUPS {
            let offsets: Vec<f64> = (0..NCOLS)
                .map(|_| if stripes { rng.gauss(0.0, stripe_level) } else { 0.0 })
                .collect();
            for r in 0..NROWS {
                for c in 0..NCOLS {
                    let signal = flux(r, c) * FLUX_PER_GROUP * g as f64;
                    let value = signal + offsets[c] + rng.gauss(0.0, 2.0);
                    data[[i, g, r, c]] = value as f32;
                }
            }
        }
    }
    data
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn main() -> Result<()> {
    let mut rng = SimpleRng::new(42);
    let output_dir = Path::new("sample_data");

    let exposures = [
        ("jw01189017001_06101_00001_nis_uncal.json", Instrument::Niriss, "NIS_IMAGE", 20.0),
        ("jw01189017001_06101_00002_nis_uncal.json", Instrument::Niriss, "NIS_IMAGE", 35.0),
        ("jw01189020001_02101_00001_nrcb1_uncal.json", Instrument::Nircam, "NRC_IMAGE", 15.0),
        ("jw01189030001_03101_00001_mirimage_uncal.json", Instrument::Miri, "MIR_IMAGE", 0.0),
    ];

    for (name, instrument, exptype, stripe_level) in exposures {
        let data = generate_ramp(instrument, stripe_level, &mut rng);
        let meta = ExposureMeta::new(instrument, exptype).with_filename(name);
        let path = output_dir.join(name);
        save_model(&DataModel::ramp(data, meta), &path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {instrument} ramp {NINTS}x{NGROUPS}x{NROWS}x{NCOLS} to {}", path.display());
    }

    // Stage 2 association over the NIRISS rates: the second dither acts as
    // background for the first.
    let asn = json!({
        "asn_pool": "jw01189_20240101t000000_pool.csv",
        "products": [{
            "name": "jw01189017001_06101_00001_nis",
            "members": [
                { "expname": "jw01189017001_06101_00001_nis_rate.json", "exptype": "science" },
                { "expname": "jw01189017001_06101_00002_nis_rate.json", "exptype": "background" }
            ]
        }]
    });
    let asn_path = output_dir.join("jw01189-o017_image2_asn.json");
    let text = serde_json::to_string_pretty(&asn)?;
    std::fs::write(&asn_path, text).with_context(|| format!("writing {}", asn_path.display()))?;
    println!("Wrote association to {}", asn_path.display());

    Ok(())
}
