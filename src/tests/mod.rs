#[cfg(test)]
use crate::prelude::*;

#[test]
fn read_mandatory_settings() {
    let settings = read_settings("src/tests/config.toml").unwrap();
    assert_eq!(settings.fit.n_components, 3);
    assert_eq!(settings.fit.max_iter, 200);
    assert_eq!(settings.fit.algorithm, Algorithm::SmoothNmf);
}

#[test]
fn read_solver_section() {
    let settings = read_settings("src/tests/config.toml").unwrap();
    assert_eq!(settings.solver.lambda_l, 2.5);
    assert_eq!(settings.solver.mu, Sparsity::PerComponent(vec![0.1, 0.0, 0.3]));
    assert!(settings.solver.accelerate);
    assert_eq!(settings.fit.init, InitStrategy::Nndsvda);
    assert_eq!(settings.fit.shape_2d, Some((8, 6)));
    assert_eq!(settings.log.level, "debug");
}

#[test]
fn defaults_are_filled_in() {
    let settings = parse_settings("[fit]\nn_components = 2\n").unwrap();
    assert_eq!(settings, Settings::new(2));
    assert_eq!(settings.solver.log_shift, 1e-14);
    assert_eq!(settings.solver.dicotomy_tol, 1e-10);
    assert_eq!(settings.solver.sigma_l, 8.0);
    assert_eq!(settings.solver.epsilon_reg, 1.0);
    assert!(settings.solver.force_simplex);
    assert!(settings.solver.safe);
    assert!(!settings.solver.l2);
    assert_eq!(settings.fit.max_iter, 10_000);
    assert_eq!(settings.fit.tol, 1e-6);
    assert_eq!(settings.fit.init, InitStrategy::Nndsvdar);
    assert_eq!(settings.fit.random_state, 42);
    assert_eq!(settings.fit.algorithm, Algorithm::Nmf);
    assert_eq!(settings.log.level, "info");
    assert!(settings.log.file.is_none());
}

#[test]
fn scalar_sparsity() {
    let settings = parse_settings("[solver]\nmu = 0.5\n[fit]\nn_components = 2\n").unwrap();
    assert_eq!(settings.solver.mu, Sparsity::Scalar(0.5));
}

#[test]
fn missing_components_is_rejected() {
    assert!(parse_settings("[fit]\nmax_iter = 3\n").is_err());
}

#[test]
fn laplacian_requires_smooth_nmf() {
    let toml = "[solver]\nlambda_l = 1.0\n[fit]\nalgorithm = \"NMF\"\nn_components = 2\n";
    assert!(parse_settings(toml).is_err());

    let mut settings = Settings::new(2);
    settings.solver.lambda_l = 1.0;
    assert!(matches!(
        settings.validate(),
        Err(NmfError::InvalidProblemType(_))
    ));
    settings.fit.algorithm = Algorithm::SmoothNmf;
    assert!(settings.validate().is_ok());
}

#[test]
fn invalid_numeric_settings() {
    let mut settings = Settings::new(2);
    settings.solver.log_shift = 0.0;
    assert!(matches!(settings.validate(), Err(NmfError::Config(_))));

    let mut settings = Settings::new(0);
    assert!(settings.validate().is_err());
    settings.fit.n_components = 1;
    settings.solver.mu = Sparsity::Scalar(-1.0);
    assert!(settings.validate().is_err());

    let mut settings = Settings::new(1);
    settings.solver.l2 = true;
    settings.solver.accelerate = true;
    assert!(settings.validate().is_err());
}

#[test]
fn settings_serialize_to_json() {
    let settings = Settings::new(4);
    let json = settings.to_json().unwrap();
    let back: Settings = serde_json::from_str(&json).unwrap();
    assert_eq!(back, settings);
}

#[test]
fn parse_problem_types() {
    assert_eq!("NMF".parse::<Algorithm>().unwrap(), Algorithm::Nmf);
    assert_eq!("SmoothNMF".parse::<Algorithm>().unwrap(), Algorithm::SmoothNmf);
    assert!(matches!(
        "PNMF".parse::<Algorithm>(),
        Err(NmfError::InvalidProblemType(_))
    ));
}

#[test]
fn parse_init_strategies() {
    assert_eq!("NNDSVDar".parse::<InitStrategy>().unwrap(), InitStrategy::Nndsvdar);
    assert_eq!("random".parse::<InitStrategy>().unwrap(), InitStrategy::Random);
    assert!(matches!(
        "svd".parse::<InitStrategy>(),
        Err(NmfError::InvalidInit(_))
    ));
}

#[test]
fn sparsity_column() {
    let mu = Sparsity::Scalar(0.2).column(3).unwrap();
    assert_eq!(mu.dim(), (3, 1));
    assert!(mu.iter().all(|m| *m == 0.2));

    assert!(Sparsity::PerComponent(vec![0.1, 0.2]).column(3).is_err());
    assert!(Sparsity::Scalar(0.0).is_zero());
    assert!(!Sparsity::PerComponent(vec![0.0, 0.0]).is_zero());
}

#[test]
fn logger_writes_to_file() {
    let path = std::env::temp_dir().join("snmfcore_logger_test.log");
    let mut settings = Settings::new(2);
    settings.log.level = "debug".to_string();
    settings.log.file = Some(path.to_string_lossy().to_string());

    setup_log(&settings).unwrap();
    tracing::info!("Logger test message");
    assert!(path.exists());

    // Only one global logger can be installed
    assert!(setup_log(&settings).is_err());
}
