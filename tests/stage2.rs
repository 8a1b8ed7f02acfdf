mod common;

use std::path::Path;

use common::{rate, rateints, Probe, Scrambler};
use rusty_ramp::data::loader::save_model;
use rusty_ramp::data::model::{Association, ExposureProduct, Member, StepStatus};
use rusty_ramp::output::OutputManager;
use rusty_ramp::pipeline::{Stage2Pipeline, StepList};
use rusty_ramp::PipelineError;

fn pipeline() -> Stage2Pipeline {
    Stage2Pipeline::new(OutputManager::detached())
}

fn steps(names: &[&str]) -> Option<StepList> {
    Some(names.iter().copied().collect())
}

fn single_product(name: &str, members: Vec<Member>) -> Association {
    Association {
        asn_pool: "jw_pool.csv".into(),
        products: vec![ExposureProduct {
            name: name.into(),
            members,
        }],
        filename: None,
    }
}

#[test]
fn science_without_background_skips_subtraction_and_is_cal() {
    let (bkg, bkg_calls) = Probe::new("bkg_subtract");
    let mut p = pipeline();
    p.registry_mut().register("bkg_subtract", bkg);

    let asn = single_product(
        "jw_prod_nis",
        vec![Member::new("science", rate(2.0, "NIS_IMAGE", "jw_prod_nis_rate.json"))],
    );
    let out = p.run(asn, steps(&["assign_wcs", "photom"]), None).unwrap();

    assert_eq!(bkg_calls.count(), 0);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].meta.filename.as_deref(), Some("jw_prod_nis_cal.json"));
    assert_eq!(out[0].step_status("assign_wcs"), Some(StepStatus::Complete));
    assert_eq!(out[0].step_status("photom"), Some(StepStatus::Complete));
    assert_eq!(out[0].step_status("flat_field"), None);
}

#[test]
fn first_of_several_science_members_is_used() {
    let asn = single_product(
        "jw_prod_nis",
        vec![
            Member::new("SCIENCE", rate(1.0, "NIS_IMAGE", "first_rate.json")),
            Member::new("science", rate(2.0, "NIS_IMAGE", "second_rate.json")),
        ],
    );
    let out = pipeline().run(asn, steps(&["flat_field"]), None).unwrap();
    assert!(out[0].data.iter().all(|&v| v == 1.0));
}

#[test]
fn product_without_science_is_an_error() {
    let asn = single_product(
        "jw_prod_nis",
        vec![Member::new("background", rate(1.0, "NIS_IMAGE", "bkg_rate.json"))],
    );
    let err = pipeline().run(asn, None, None).unwrap_err();
    assert!(matches!(err, PipelineError::NoScienceMember(ref name) if name == "jw_prod_nis"));
}

#[test]
fn resample_output_does_not_replace_model() {
    let (scrambler, resample_calls) = Scrambler::new();
    let mut p = pipeline();
    p.registry_mut().register("resample", scrambler);

    let asn = single_product(
        "jw_prod_nis",
        vec![Member::new("science", rate(7.0, "NIS_IMAGE", "jw_prod_nis_rate.json"))],
    );
    let out = p.run(asn, steps(&["photom", "resample"]), None).unwrap();

    assert_eq!(resample_calls.count(), 1);
    assert!(out[0].data.iter().all(|&v| v == 7.0));
    assert_eq!(out[0].step_status("photom"), Some(StepStatus::Complete));
}

#[test]
fn background_is_invoked_with_bsub_suffix() {
    let mut p = pipeline();
    p.save_bsub = true;
    let asn = single_product(
        "jw_prod_nis",
        vec![
            Member::new("science", rateints(5.0, "jw_prod_nis_rateints.json")),
            Member::new("background", rateints(1.0, "jw_bkg_rateints.json")),
        ],
    );
    let out = p.run(asn, steps(&["bkg_subtract"]), None).unwrap();

    assert!(out[0].data.iter().all(|&v| v == 4.0));
    assert_eq!(out[0].meta.filename.as_deref(), Some("jw_prod_nis_calints.json"));
    assert_eq!(p.outputs().saved_with_suffix("bsubints").count(), 1);
}

#[test]
fn noise_correction_runs_last_on_cubes() {
    let cube = rateints(5.0, "jw_prod_nis_rateints.json");
    let out = pipeline()
        .run(cube, steps(&["flat_field", "noise_correction"]), None)
        .unwrap();
    assert_eq!(out[0].step_status("noise_correction"), Some(StepStatus::Complete));
    assert!(out[0].data.iter().all(|&v| v.abs() < 1e-6));
}

#[test]
fn association_file_is_processed_and_saved() {
    let dir = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    save_model(&rate(3.0, "NIS_IMAGE", "sci_rate.json"), &dir.path().join("sci_rate.json")).unwrap();
    save_model(&rate(1.0, "NIS_IMAGE", "bkg_rate.json"), &dir.path().join("bkg_rate.json")).unwrap();
    let asn_path = dir.path().join("jw_image2_asn.json");
    std::fs::write(
        &asn_path,
        r#"{
            "asn_pool": "jw_pool.csv",
            "products": [{
                "name": "jw_prod_nis",
                "members": [
                    {"expname": "sci_rate.json", "exptype": "science"},
                    {"expname": "bkg_rate.json", "exptype": "background"}
                ]
            }]
        }"#,
    )
    .unwrap();

    let mut p = Stage2Pipeline::new(OutputManager::new(out_dir.path()));
    p.save_results = true;
    let out = p.run(asn_path, None, None).unwrap();

    assert!(out[0].data.iter().all(|&v| v == 2.0));
    assert_eq!(out[0].meta.asn.pool_name.as_deref(), Some("jw_pool.csv"));
    assert_eq!(out[0].meta.asn.table_name.as_deref(), Some("jw_image2_asn.json"));
    assert!(out_dir.path().join("jw_prod_nis_cal.json").is_file());
    assert!(out_dir.path().join("sci_i2d.json").is_file());
}

#[test]
fn failing_product_keeps_earlier_products_saved() {
    let missing = Path::new("/nonexistent/missing_rate.json");
    let asn = Association {
        asn_pool: "jw_pool.csv".into(),
        products: vec![
            ExposureProduct {
                name: "jw_ok".into(),
                members: vec![Member::new("science", rate(1.0, "NIS_IMAGE", "ok_rate.json"))],
            },
            ExposureProduct {
                name: "jw_broken".into(),
                members: vec![Member::new("science", missing)],
            },
        ],
        filename: None,
    };
    let mut p = pipeline();
    p.save_results = true;
    let err = p.run(asn, steps(&["flat_field"]), None).unwrap_err();

    assert!(matches!(err, PipelineError::Io { .. }));
    let saved: Vec<_> = p.outputs().saved_with_suffix("cal").collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].path.ends_with("jw_ok_cal.json"));
}

#[test]
fn unknown_step_fails_before_opening_input() {
    let err = pipeline()
        .run(Path::new("/nonexistent/asn.json").to_path_buf(), steps(&["skymatch"]), None)
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownStep(ref name) if name == "skymatch"));
}
