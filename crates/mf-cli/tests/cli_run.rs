use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mforce"))
}

fn tmp_path(filename: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("mforce_cli_run_{}_{}_{}", std::process::id(), nanos, filename));
    p
}

fn run(args: &[&str]) -> Output {
    Command::new(bin_path())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("failed to run {:?} {:?}: {}", bin_path(), args, e))
}

/// Covariates of city `i`: density, income, poverty, young-male share.
fn covariates(i: usize) -> [f64; 4] {
    [
        1.0 + (i * 37 % 100) as f64 / 25.0,
        40.0 + (i * 53 % 97) as f64 / 5.0,
        0.1 + (i * 29 % 41) as f64 / 200.0,
        0.12 + (i * 17 % 23) as f64 / 500.0,
    ]
}

/// Deterministic preprocessed panel with a treatment effect of 3.
fn write_panel(n: usize) -> PathBuf {
    let path = tmp_path("panel.csv");
    let mut csv = String::from(
        "city,year,population_density,median_income,poverty_rate,male_15_24,treatment,\
         delta_violent_crime,delta_property_crime\n",
    );
    for i in 0..n {
        let [d, inc, pov, male] = covariates(i);
        let u = ((i * 7919 + 13) % 101) as f64 / 101.0;
        let t = if u < 0.2 + 0.12 * d { 1 } else { 0 };
        let noise = (i * 31 % 17) as f64 / 17.0 - 0.5;
        let delta = 3.0 * t as f64 + d - 0.05 * inc + noise;
        let placebo = 0.5 * d + (i * 13 % 7) as f64 / 7.0;
        csv.push_str(&format!(
            "city{i},2019,{d},{inc},{pov},{male},{t},{delta},{placebo}\n"
        ));
    }
    std::fs::write(&path, csv).unwrap();
    path
}

#[test]
fn version_prints_binary_name() {
    let out = run(&["version"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.starts_with("mforce "), "stdout={stdout}");
}

#[test]
fn run_writes_report_and_matched_sample() {
    let panel = write_panel(240);
    let report = tmp_path("report.json");
    let matched = tmp_path("matched.csv");

    let out = run(&[
        "run",
        "-i",
        panel.to_string_lossy().as_ref(),
        "-o",
        report.to_string_lossy().as_ref(),
        "--matched-out",
        matched.to_string_lossy().as_ref(),
        "--threads",
        "2",
    ]);
    assert!(
        out.status.success(),
        "run failed, stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );

    let v: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(v["design"], "difference_in_differences");
    assert_eq!(v["outcome"], "delta_violent_crime");
    assert_eq!(v["placebo_outcome"], "delta_property_crime");
    assert_eq!(v["n_input_rows"], 240);
    let pairs = v["matched_pairs"].as_u64().unwrap();
    assert!(pairs > 0);
    assert!(v["att"].as_f64().is_some());
    assert!(v["adjusted_att"].as_f64().is_some());
    assert!(v["regression"]["coefficients"].as_array().unwrap().len() == 6);

    let matched_csv = std::fs::read_to_string(&matched).unwrap();
    let mut lines = matched_csv.lines();
    let header = lines.next().unwrap();
    assert!(header.contains("match_id"));
    assert!(header.contains("role"));
    assert!(header.contains("propensity_score"));
    assert_eq!(lines.count() as u64, 2 * pairs);

    let _ = std::fs::remove_file(&panel);
    let _ = std::fs::remove_file(&report);
    let _ = std::fs::remove_file(&matched);
}

#[test]
fn run_prints_json_to_stdout_by_default() {
    let panel = write_panel(120);
    let out = run(&["run", "-i", panel.to_string_lossy().as_ref()]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert!(v.get("rosenbaum_sweep").is_some());
    let _ = std::fs::remove_file(&panel);
}

#[test]
fn zero_caliper_from_yaml_config_matches_nothing() {
    let panel = write_panel(120);
    let config = tmp_path("analysis.yaml");
    std::fs::write(&config, "caliper: 0.0\ngamma: 2.0\n").unwrap();

    let out = run(&[
        "run",
        "-i",
        panel.to_string_lossy().as_ref(),
        "-c",
        config.to_string_lossy().as_ref(),
    ]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["matched_pairs"], 0);
    assert!(v["att"].is_null());
    assert!(v["adjusted_att"].is_null());
    assert!(v["placebo"].is_null());

    let _ = std::fs::remove_file(&panel);
    let _ = std::fs::remove_file(&config);
}

#[test]
fn prepare_then_run() {
    let n = 80;
    let fisc = tmp_path("fisc.csv");
    let cius = tmp_path("cius.csv");
    let acs = tmp_path("acs.csv");
    let panel = tmp_path("prepared.csv");

    let mut f = String::from("city,year,police_spending\n");
    let mut c = String::from("city,year,violent_crime_rate,property_crime_rate\n");
    let mut a =
        String::from("city,year,population_density,median_income,poverty_rate,male_15_24\n");
    for i in 0..n {
        let spend = 100 + (i * 61 % 89);
        let [d, inc, pov, male] = covariates(i);
        for year in [2015, 2019] {
            f.push_str(&format!("city{i},{year},{spend}\n"));
            let violent = 10.0 + d + if year == 2019 { 0.01 * spend as f64 } else { 0.0 };
            let property = 40.0 + 2.0 * d + (i % 5) as f64;
            c.push_str(&format!("city{i},{year},{violent},{property}\n"));
        }
        a.push_str(&format!("city{i},2019,{d},{inc},{pov},{male}\n"));
    }
    std::fs::write(&fisc, f).unwrap();
    std::fs::write(&cius, c).unwrap();
    std::fs::write(&acs, a).unwrap();

    let out = run(&[
        "prepare",
        "--fisc",
        fisc.to_string_lossy().as_ref(),
        "--cius",
        cius.to_string_lossy().as_ref(),
        "--acs",
        acs.to_string_lossy().as_ref(),
        "-o",
        panel.to_string_lossy().as_ref(),
    ]);
    assert!(out.status.success(), "prepare failed, stderr={}", String::from_utf8_lossy(&out.stderr));

    let prepared = std::fs::read_to_string(&panel).unwrap();
    let header = prepared.lines().next().unwrap();
    assert!(header.contains("delta_violent_crime"));
    assert!(header.contains("treatment"));
    // Top and bottom quartiles of 80 distinct spending values.
    assert_eq!(prepared.lines().count(), 1 + 40);

    let out = run(&["run", "-i", panel.to_string_lossy().as_ref()]);
    assert!(out.status.success(), "run failed, stderr={}", String::from_utf8_lossy(&out.stderr));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v["design"], "difference_in_differences");
    assert_eq!(v["n_input_rows"], 40);

    for p in [&fisc, &cius, &acs, &panel] {
        let _ = std::fs::remove_file(p);
    }
}

#[test]
fn missing_input_fails() {
    let out = run(&["run", "-i", "/nonexistent/mforce/panel.csv"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("failed to open"), "stderr={stderr}");
}
