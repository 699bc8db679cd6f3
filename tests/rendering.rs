//! Script rendering tests
//!
//! Headers, placeholders and settings layering as seen in rendered scripts.

mod fixtures;

use std::fs;

use clusterjob::config::{ConfigError, EffectiveSettings};
use clusterjob::job::{JobError, JobSpec};
use clusterjob::render::RenderError;

use fixtures::{printenv_job, Harness};

#[test]
fn test_printenv_slurm_script() {
    let harness = Harness::new();
    let job = printenv_job(&harness);

    let expected = "\
#!/bin/bash
#SBATCH --job-name=printenv
#SBATCH --mem=100
#SBATCH --nodes=1
#SBATCH --partition=test
#SBATCH --error=printenv.err
#SBATCH --output=printenv.out
#SBATCH --cpus-per-task=1
#SBATCH --time=00:05:00

echo \"Job id: $SLURM_JOB_ID\"
echo \"Job name: $SLURM_JOB_NAME\"
echo \"Submitted from: ${SLURM_SUBMIT_DIR}\"
printenv
";
    assert_eq!(job.render().unwrap(), expected);
}

#[test]
fn test_printenv_lsf_script() {
    let harness = Harness::new();
    let mut job = printenv_job(&harness);
    job.set_backend("lsf").unwrap();

    let script = job.render().unwrap();
    assert!(script.starts_with("#!/bin/bash\n#BSUB "));
    assert!(script.contains("#BSUB -J printenv\n"));
    assert!(script.contains("#BSUB -W 5\n"));
    assert!(script.contains("#BSUB -q test\n"));
    assert!(!script.contains("CLUSTERJOB_"));
    assert_eq!(job.script_filename().unwrap(), "printenv.lsf");
}

#[test]
fn test_pbs_backend_defaults_and_node_line() {
    let harness = Harness::new();
    let mut job = harness.job("cd $CLUSTERJOB_WORKDIR\n", "mpi");
    job.set_backend("pbs").unwrap();
    job.set_resource("nodes", 2).unwrap();
    job.set_resource("threads", 4).unwrap();

    let script = job.render().unwrap();
    let lines: Vec<&str> = script.lines().collect();
    assert_eq!(lines[0], "#!/bin/bash");
    assert_eq!(lines[1], "#PBS -l nodes=2:ppn=4");
    assert!(lines.contains(&"#PBS -V"));
    assert!(lines.contains(&"#PBS -j oe"));
    assert!(lines.contains(&"#PBS -N mpi"));
    assert_eq!(lines.last(), Some(&"cd $PBS_O_WORKDIR"));
}

#[test]
fn test_job_resources_override_backend_defaults() {
    let harness = Harness::new();
    let mut job = harness.job("true\n", "joined");
    job.set_backend("pbs").unwrap();
    job.set_resource("j", "eo").unwrap();

    let script = job.render().unwrap();
    assert!(script.contains("#PBS -j eo\n"));
    assert!(!script.contains("#PBS -j oe\n"));
}

#[test]
fn test_variables_and_fulldir() {
    let harness = Harness::new();
    let mut job = harness.job("cd {fulldir}\necho {greeting}, {name}\n", "vars");
    job.set_rootdir("/scratch");
    job.set_workdir("run");
    job.set_variable("greeting", "hello").unwrap();
    job.set_variable("name", "world").unwrap();

    let script = job.render().unwrap();
    assert!(script.ends_with("\ncd /scratch/run\necho hello, world\n"));
    assert_eq!(job.script_path().unwrap(), "/scratch/run/vars.slr");
}

#[test]
fn test_unresolved_placeholder() {
    let harness = Harness::new();
    let job = harness.job("echo ok\necho {nowhere}\n", "missing");

    match job.render() {
        Err(JobError::Render(RenderError::UnresolvedPlaceholder { name, line })) => {
            assert_eq!(name, "nowhere");
            assert_eq!(line, 2);
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_bad_walltime_is_render_error() {
    let harness = Harness::new();
    let mut job = harness.job("true\n", "late");
    job.set_resource("time", "next week").unwrap();
    assert!(matches!(job.render(), Err(JobError::Render(RenderError::Backend(_)))));
}

#[test]
fn test_write_local_scripts() {
    let harness = Harness::new();
    let mut job = harness.job("./setup.sh\nhostname\n", "local");
    job.add_aux_script("setup.sh", "mkdir -p {fulldir}/out").unwrap();

    let path = job.write(None).unwrap();
    let run_dir = harness.run_dir();
    assert_eq!(path, run_dir.join("local.slr").to_string_lossy());
    assert_eq!(fs::read_to_string(&path).unwrap(), job.render().unwrap());
    assert_eq!(
        fs::read_to_string(run_dir.join("setup.sh")).unwrap(),
        format!("#!/bin/bash\nmkdir -p {}/out", run_dir.display())
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}

// =============================================================================
// Settings files
// =============================================================================

#[test]
fn test_settings_file_defaults() {
    let harness = Harness::new();
    let settings = harness.dir.path().join("site.toml");
    fs::write(
        &settings,
        "[attributes]\nshell = \"/bin/zsh\"\n\n[resources]\nqueue = \"debug\"\n\n[variables]\ngreeting = \"hi\"\n",
    )
    .unwrap();

    let effective = EffectiveSettings::build(&[settings.as_path()], None).unwrap();
    assert_eq!(effective.sources.len(), 2);
    assert!(effective.sources[1].digest.is_some());

    let env = harness.environment_with(effective.defaults().unwrap());
    let job = JobSpec::new("echo {greeting}\n", "site", &env).unwrap();
    assert_eq!(
        job.render().unwrap(),
        "#!/bin/zsh\n#SBATCH --job-name=site\n#SBATCH --partition=debug\n\necho hi\n"
    );
}

#[test]
fn test_later_layers_win() {
    let harness = Harness::new();
    let first = harness.dir.path().join("a.toml");
    let second = harness.dir.path().join("b.toml");
    fs::write(&first, "[resources]\nqueue = \"short\"\nmem = 500\n").unwrap();
    fs::write(&second, "[resources]\nqueue = \"long\"\n").unwrap();

    let cli = serde_json::json!({ "attributes": { "backend": "sge" } });
    let effective =
        EffectiveSettings::build(&[first.as_path(), second.as_path()], Some(cli)).unwrap();
    let defaults = effective.defaults().unwrap();

    assert_eq!(defaults.attributes.backend, "sge");
    assert_eq!(effective.get_str("resources.queue"), Some("long"));
    assert_eq!(effective.get_u64("resources.mem"), Some(500));
}

#[test]
fn test_unknown_attribute_in_settings_file() {
    let harness = Harness::new();
    let settings = harness.dir.path().join("bad.toml");
    fs::write(&settings, "[attributes]\nshel = \"/bin/sh\"\n").unwrap();

    assert!(EffectiveSettings::build(&[settings.as_path()], None).is_err());

    let mut job = harness.job("true\n", "strict");
    assert!(job.read_settings(&settings).is_err());
}

#[test]
fn test_unknown_backend_in_job_settings() {
    let harness = Harness::new();
    let settings = harness.dir.path().join("condor.toml");
    fs::write(&settings, "[attributes]\nbackend = \"condor\"\n").unwrap();

    let mut job = harness.job("true\n", "strict");
    assert!(matches!(
        job.read_settings(&settings),
        Err(ConfigError::UnknownBackend(name)) if name == "condor"
    ));
}

#[test]
fn test_job_settings_through_setters() {
    let harness = Harness::new();
    let settings = harness.dir.path().join("job.toml");
    fs::write(
        &settings,
        "[attributes]\nbackend = \"sge\"\nsleep_interval = 30\n\n[resources]\nqueue = \"all.q\"\nexclusive = true\n\n[variables]\ninput = \"data.csv\"\n",
    )
    .unwrap();

    let mut job = harness.job("wc -l {input}\n", "counted");
    job.read_settings(&settings).unwrap();

    assert_eq!(job.attributes().backend, "sge");
    assert_eq!(job.attributes().sleep_interval, Some(30));
    let script = job.render().unwrap();
    assert!(script.contains("#$ -q all.q\n"));
    assert!(script.ends_with("\nwc -l data.csv\n"));
    assert_eq!(job.script_filename().unwrap(), "counted.sge");
}
