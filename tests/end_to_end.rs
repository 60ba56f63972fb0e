use std::path::Path;

use boolode::{PerturbationArity, Settings, start_perturbations, start_run};
use tempfile::TempDir;

/// Writes an `n`-gene constitutive model (no proteins) and returns its path.
fn write_model(dir: &Path, genes: usize) -> std::path::PathBuf {
    let species: Vec<String> = (1..=genes)
        .map(|g| {
            format!(
                r#"{{"name": "x_g{g}", "production": "m_g{g}", "degradation": "l_x_g{g} * x_g{g}"}}"#
            )
        })
        .collect();
    let parameters: Vec<String> = (1..=genes)
        .flat_map(|g| [format!(r#""m_g{g}": 2.0"#), format!(r#""l_x_g{g}": 1.0"#)])
        .collect();
    let names: Vec<String> = (1..=genes).map(|g| format!(r#""g{g}""#)).collect();
    let json = format!(
        r#"{{"name": "constitutive", "species": [{}], "parameters": {{{}}}, "genes": [{}], "x_max": 2.0}}"#,
        species.join(", "),
        parameters.join(", "),
        names.join(", ")
    );
    let path = dir.join("model.json");
    std::fs::write(&path, json).unwrap();
    path
}

fn settings(dir: &TempDir, genes: usize, extra: &str) -> Settings {
    let model = write_model(dir.path(), genes);
    let outprefix = dir.path().join("out");
    let source = format!(
        "name = 'e2e'\n\
         model_path = '{}'\n\
         outprefix = '{}'\n\
         simulation_time = 10.0\n\
         integration_step_size = 0.5\n\
         num_cells = 4\n\
         noise_strength = 0.1\n\
         {extra}\n",
        model.display(),
        outprefix.display()
    );
    Settings::from_toml_str(&source).unwrap()
}

#[test]
fn two_gene_run_produces_full_table() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir, 2, "");
    let output = start_run(&settings).unwrap();

    // 20 time points, 19 kept per cell after t=0.
    assert_eq!(output.tspan.len(), 20);
    let table = &output.result.table;
    assert_eq!(table.rows, vec!["g1", "g2"]);
    assert_eq!(table.n_cols(), 4 * 19);
    assert!(table.values().iter().all(|&v| v >= 0.0));
    assert_eq!(output.result.final_states.len(), 4);

    let outprefix = &settings.outprefix;
    assert!(outprefix.join("ExpressionData.csv").exists());
    assert!(outprefix.join("PseudoTime.csv").exists());
    for cell in 0..4 {
        assert!(
            outprefix
                .join("simulations")
                .join(format!("E{cell}.csv"))
                .exists()
        );
    }
    assert!(!outprefix.join("ClusterIds.csv").exists());
}

#[test]
fn same_seed_reproduces_dataset() {
    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();
    let first = start_run(&settings(&first_dir, 2, "seed = 11")).unwrap();
    let second = start_run(&settings(&second_dir, 2, "seed = 11\ndo_parallel = true")).unwrap();
    assert_eq!(first.result.table, second.result.table);
}

#[test]
fn clustering_labels_every_cell() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir, 2, "n_clusters = 2");
    let output = start_run(&settings).unwrap();
    let labels = output.result.cluster_ids.unwrap();
    assert_eq!(labels.len(), 4);
    assert!(labels.iter().all(|&l| l < 2));

    let written = std::fs::read_to_string(settings.outprefix.join("ClusterIds.csv")).unwrap();
    assert_eq!(written.lines().count(), 5);
}

#[test]
fn single_gene_perturbations_cover_every_gene() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir, 3, "");
    let mut previous = start_run(&settings).unwrap();
    let before = previous.generated.spec.pars.clone();

    let outcome = start_perturbations(&settings, &mut previous, 2.0, PerturbationArity::Single)
        .unwrap();

    assert_eq!(outcome.gene_ids, vec![1, 2, 3]);
    assert_eq!(outcome.runs.len(), 3);
    assert_eq!(previous.generated.spec.pars, before);
    for gene in 1..=3 {
        let run_dir = settings.outprefix.join(format!("Perturbation_{gene}"));
        assert!(run_dir.join("simulations").join("E0.csv").exists());
    }
    assert!(outcome.final_states.contains_key("[0]"));
    assert_eq!(outcome.final_states["[0]"], previous.result.final_states);
}

#[test]
fn pair_perturbations_use_pair_baseline() {
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir, 3, "");
    let mut previous = start_run(&settings).unwrap();
    let outcome =
        start_perturbations(&settings, &mut previous, 2.0, PerturbationArity::Pairs).unwrap();
    assert_eq!(outcome.runs.len(), 3);
    assert!(outcome.final_states.contains_key("[0, 0]"));
    assert!(settings.outprefix.join("Perturbation_1_3").exists());
}

#[test]
fn ics_table_overrides_starting_levels() {
    let dir = TempDir::new().unwrap();
    let ics = dir.path().join("ics.txt");
    std::fs::write(&ics, "Genes\tValues\n['g1']\t[1.5]\n").unwrap();
    let settings = settings(&dir, 2, &format!("ics_path = '{}'", ics.display()));
    let output = start_run(&settings).unwrap();
    assert_eq!(output.result.table.n_rows(), 2);
}
