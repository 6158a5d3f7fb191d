use fast_anomaly_detector::{
    anomaly_detector, AnalysisError, DetectorConfig, FeatureTable, LoadOutcome, Scaler,
    ScalerMode, ScalingMethod, TrainOptions, TrainReport, Verdict,
};
use ndarray::{concatenate, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::Path;

/// `n` samples around `centre` with unit standard deviation per feature
fn gaussian_cluster(rng: &mut StdRng, centre: f64, n: usize, dims: usize) -> Array2<f64> {
    Array2::from_shape_simple_fn((n, dims), || {
        let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = rng.gen();
        centre + (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    })
}

fn two_clusters() -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(7);
    let a = gaussian_cluster(&mut rng, 0.0, 100, 4);
    let b = gaussian_cluster(&mut rng, 10.0, 100, 4);
    concatenate(Axis(0), &[a.view(), b.view()]).unwrap()
}

fn save_scaler(dir: &Path, dataset: &str, data: &Array2<f64>) -> Scaler {
    let scaler = Scaler::fit(data, ScalingMethod::MinMax).unwrap();
    scaler.save(&dir.join(format!("{}_scaler.pkl", dataset))).unwrap();
    scaler
}

fn quick_dl_config(dir: &Path) -> DetectorConfig {
    let mut config = DetectorConfig::with_artifact_dir(dir);
    config.deep_learning = TrainOptions {
        epochs: 3,
        batch_size: 32,
        ..TrainOptions::default()
    };
    config
}

#[test]
fn test_two_cluster_location_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let train = two_clusters();
    let scaler = save_scaler(dir.path(), "location", &train);

    let mut config = DetectorConfig::with_artifact_dir(dir.path());
    config.gmm.n_components = 2;
    let mut detector = anomaly_detector("classic", "location", &config).unwrap();
    detector.build_model(4).unwrap();
    let report = detector.train(&scaler.transform(&train).unwrap(), None).unwrap();
    assert_eq!(report, TrainReport::Gmm);
    assert!(dir.path().join("GMM_location.pkl").exists());

    let held_out = ndarray::arr2(&[
        [0.0, 0.0, 0.0, 0.0],
        [10.0, 10.0, 10.0, 10.0],
        [5.0, 5.0, 5.0, 5.0],
        [30.0, 30.0, 30.0, 30.0],
    ]);
    let detections = detector.detect_anomalies(&held_out).unwrap();
    let verdicts: Vec<Verdict> = detections.iter().map(|d| d.verdict).collect();
    assert_eq!(
        verdicts,
        vec![
            Verdict::Normal,
            Verdict::Normal,
            Verdict::Abnormal,
            Verdict::Abnormal
        ]
    );
    assert_eq!(
        detections.iter().map(|d| d.index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
}

#[test]
fn test_gmm_threshold_is_mean_plus_std() {
    let dir = tempfile::tempdir().unwrap();
    let train = two_clusters();
    let scaled = save_scaler(dir.path(), "location", &train).transform(&train).unwrap();

    let mut config = DetectorConfig::with_artifact_dir(dir.path());
    config.gmm.n_components = 2;
    let mut detector = anomaly_detector("classic", "location", &config).unwrap();
    detector.build_model(4).unwrap();
    detector.train(&scaled, None).unwrap();

    let scores = detector.score_samples(&scaled).unwrap();
    let expected = scores.mean().unwrap() + scores.std(0.0);
    assert!((detector.threshold().unwrap() - expected).abs() < 1e-9);
}

#[test]
fn test_dl_threshold_and_outlier() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    let train = gaussian_cluster(&mut rng, 50.0, 120, 3);
    let scaled = save_scaler(dir.path(), "velocity", &train).transform(&train).unwrap();

    let mut detector = anomaly_detector("deep_learning", "velocity", &quick_dl_config(dir.path())).unwrap();
    detector.build_model(3).unwrap();
    match detector.train(&scaled, None).unwrap() {
        TrainReport::DeepLearning(history) => assert_eq!(history.epochs(), 3),
        other => panic!("expected a training history, got {:?}", other),
    }
    assert!(dir.path().join("DL_velocity_model.h5").exists());

    let errors = detector.score_samples(&scaled).unwrap();
    let expected = errors.mean().unwrap() + errors.std(0.0);
    assert!((detector.threshold().unwrap() - expected).abs() < 1e-12);

    let outlier = ndarray::arr2(&[[1000.0, -1000.0, 1000.0]]);
    let batch = concatenate(Axis(0), &[train.view(), outlier.view()]).unwrap();
    let detections = detector.detect_anomalies(&batch).unwrap();
    assert_eq!(detections.len(), 121);
    assert!(detections[120].is_anomaly());
    assert!(detections.iter().filter(|d| d.is_anomaly()).count() < 121);
}

#[test]
fn test_persisted_detector_reproduces_verdicts() {
    for kind in ["classic", "deep_learning"] {
        let dir = tempfile::tempdir().unwrap();
        let train = two_clusters();
        let scaled = save_scaler(dir.path(), "location", &train).transform(&train).unwrap();
        let mut config = quick_dl_config(dir.path());
        config.gmm.n_components = 2;

        let mut trained = anomaly_detector(kind, "location", &config).unwrap();
        trained.build_model(4).unwrap();
        trained.train(&scaled, None).unwrap();
        let before = trained.detect_anomalies(&train).unwrap();

        let mut fresh = anomaly_detector(kind, "location", &config).unwrap();
        assert!(!fresh.has_model());
        let after = fresh.detect_anomalies(&train).unwrap();

        assert!(fresh.has_model(), "{} model should load lazily", kind);
        assert_eq!(fresh.threshold(), trained.threshold());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.verdict, b.verdict);
            assert!((a.statistic - b.statistic).abs() < 1e-9);
        }
    }
}

#[test]
fn test_detect_without_scaler() {
    let dir = tempfile::tempdir().unwrap();
    let config = DetectorConfig::with_artifact_dir(dir.path());
    let mut detector = anomaly_detector("classic", "velocity", &config).unwrap();

    assert!(matches!(detector.load_scaler(), LoadOutcome::NotFound(_)));
    let err = detector.detect_anomalies(&two_clusters()).unwrap_err();
    assert!(matches!(err, AnalysisError::ScalerUnavailable { .. }));
}

#[test]
fn test_detect_without_model() {
    let dir = tempfile::tempdir().unwrap();
    let train = two_clusters();
    save_scaler(dir.path(), "velocity", &train);

    for kind in ["classic", "deep_learning"] {
        let config = DetectorConfig::with_artifact_dir(dir.path());
        let mut detector = anomaly_detector(kind, "velocity", &config).unwrap();
        assert!(detector.load_scaler().is_loaded());
        assert!(matches!(detector.load_model(), LoadOutcome::NotFound(_)));
        let err = detector.detect_anomalies(&train).unwrap_err();
        assert!(matches!(err, AnalysisError::ModelNotBuilt(_)));
    }
}

#[test]
fn test_corrupt_artifacts_degrade() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("location_scaler.pkl"), b"\x80\x04\x95 pickle bytes").unwrap();
    fs::write(dir.path().join("GMM_location.pkl"), b"{\"kind\": \"gaussian_mixture\"").unwrap();
    fs::write(dir.path().join("DL_location_model.h5"), b"").unwrap();

    let config = DetectorConfig::with_artifact_dir(dir.path());
    for kind in ["classic", "deep_learning"] {
        let mut detector = anomaly_detector(kind, "location", &config).unwrap();
        assert!(matches!(detector.load_scaler(), LoadOutcome::Corrupt { .. }));
        assert!(matches!(detector.load_model(), LoadOutcome::Corrupt { .. }));
        assert!(!detector.has_model());
        assert!(detector.threshold().is_none());
        assert!(detector.detect_anomalies(&two_clusters()).is_err());
    }
}

#[test]
fn test_artifact_of_wrong_kind_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let train = two_clusters();
    // A scaler file where the model is expected
    Scaler::fit(&train, ScalingMethod::MinMax)
        .unwrap()
        .save(&dir.path().join("GMM_location.pkl"))
        .unwrap();

    let config = DetectorConfig::with_artifact_dir(dir.path());
    let mut detector = anomaly_detector("classic", "location", &config).unwrap();
    match detector.load_model() {
        LoadOutcome::Corrupt { reason, .. } => assert!(reason.contains("scaler")),
        other => panic!("expected Corrupt, got {:?}", other),
    }
}

#[test]
fn test_model_without_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let train = two_clusters();
    let scaled = save_scaler(dir.path(), "location", &train).transform(&train).unwrap();
    let config = DetectorConfig::with_artifact_dir(dir.path());

    let mut trained = anomaly_detector("classic", "location", &config).unwrap();
    trained.build_model(4).unwrap();
    trained.train(&scaled, None).unwrap();

    let path = dir.path().join("GMM_location.pkl");
    let mut artifact: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    artifact["payload"]["threshold"] = serde_json::Value::Null;
    fs::write(&path, serde_json::to_vec(&artifact).unwrap()).unwrap();

    let mut fresh = anomaly_detector("classic", "location", &config).unwrap();
    let err = fresh.detect_anomalies(&train).unwrap_err();
    assert!(matches!(err, AnalysisError::ThresholdNotSet));

    fresh.determine_threshold(&scaled).unwrap();
    assert!((fresh.threshold().unwrap() - trained.threshold().unwrap()).abs() < 1e-9);
    assert_eq!(fresh.detect_anomalies(&train).unwrap().len(), train.nrows());
}

#[test]
fn test_scaler_modes() {
    let dir = tempfile::tempdir().unwrap();
    let train = two_clusters();
    let scaled = save_scaler(dir.path(), "location", &train).transform(&train).unwrap();
    let shifted = train.mapv(|x| x + 100.0);

    let mut config = DetectorConfig::with_artifact_dir(dir.path());
    config.gmm.n_components = 2;
    let mut trained = anomaly_detector("classic", "location", &config).unwrap();
    trained.build_model(4).unwrap();
    trained.train(&scaled, None).unwrap();
    let baseline = trained.detect_anomalies(&train).unwrap();

    // The persisted fit is applied unchanged, so a shifted batch is far from the training data
    let transform_only = trained.detect_anomalies(&shifted).unwrap();
    assert!(transform_only.iter().all(|d| d.is_anomaly()));

    // Refitting on the batch erases the shift
    config.scaler_mode = ScalerMode::RefitOnBatch;
    let mut refit = anomaly_detector("classic", "location", &config).unwrap();
    let refitted = refit.detect_anomalies(&shifted).unwrap();
    for (a, b) in baseline.iter().zip(refitted.iter()) {
        assert!((a.statistic - b.statistic).abs() < 1e-6);
    }
}

#[test]
fn test_csv_rows_drive_detection() {
    let dir = tempfile::tempdir().unwrap();
    let train = two_clusters();
    let scaled = save_scaler(dir.path(), "location", &train).transform(&train).unwrap();
    let mut config = DetectorConfig::with_artifact_dir(dir.path());
    config.gmm.n_components = 2;
    let mut detector = anomaly_detector("classic", "location", &config).unwrap();
    detector.build_model(4).unwrap();
    detector.train(&scaled, None).unwrap();

    let csv = "id,x,y,z,w,label\n\
               a,0.1,-0.2,0.0,0.3,ok\n\
               b,40,40,40,40,bad\n";
    let table = FeatureTable::from_csv(csv).unwrap();
    assert_eq!(table.columns, vec!["x", "y", "z", "w"]);

    let detections = detector.detect_anomalies(&table.features).unwrap();
    assert_eq!(detections[0].verdict, Verdict::Normal);
    assert_eq!(detections[1].verdict, Verdict::Abnormal);
    assert_eq!(detections[1].verdict.to_string(), "Abnormal");
}

#[test]
fn test_csv_training_then_json_detection_with_reordered_keys() {
    let dir = tempfile::tempdir().unwrap();
    let train = two_clusters();
    let mut csv = String::from("x,y,z,w\n");
    for row in train.rows() {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }
    let table = FeatureTable::from_csv(&csv).unwrap();
    let scaler = Scaler::fit(&table.features, ScalingMethod::MinMax)
        .unwrap()
        .with_columns(table.columns.clone())
        .unwrap();
    scaler.save(&dir.path().join("location_scaler.pkl")).unwrap();

    let mut config = DetectorConfig::with_artifact_dir(dir.path());
    config.gmm.n_components = 2;
    let mut trained = anomaly_detector("classic", "location", &config).unwrap();
    trained.build_model(4).unwrap();
    trained.train(&scaler.transform(&table.features).unwrap(), None).unwrap();

    let json = r#"[
        {"w": 0.0, "z": 0.0, "y": 0.0, "x": 0.0},
        {"w": 0.0, "z": 0.0, "y": 0.0, "x": 40.0}
    ]"#;
    let batch = FeatureTable::from_json(json).unwrap();
    assert_eq!(batch.columns, vec!["w", "z", "y", "x"]);

    let mut fresh = anomaly_detector("classic", "location", &config).unwrap();
    let loaded = Scaler::load(&dir.path().join("location_scaler.pkl")).into_option().unwrap();
    assert_eq!(loaded.columns(), ["x", "y", "z", "w"]);
    let aligned = batch.aligned_to(&loaded).unwrap();
    assert_eq!(aligned.features.row(1).to_vec(), vec![40.0, 0.0, 0.0, 0.0]);

    let verdicts: Vec<Verdict> = fresh
        .detect_anomalies(&aligned.features)
        .unwrap()
        .iter()
        .map(|d| d.verdict)
        .collect();
    assert_eq!(verdicts, vec![Verdict::Normal, Verdict::Abnormal]);
}
