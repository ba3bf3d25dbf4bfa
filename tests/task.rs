//! The build-step entry point over real files.

mod common;

use std::{fs, path::{Path, PathBuf}};

use aspectweave::{
    emulation::EmValue,
    file::{self, symbols::SymbolFile},
    metadata::builders::ClassBuilder,
    signing::SigningKey,
    weaver::WeaveOutcome,
    Error, Result, WeaveConfig, WeaveTask,
};
use common::{adder, aspect, module, returned_i32, runtime, tag, trace, Log};

fn write_sample(dir: &Path, with_aspect: bool) -> Result<PathBuf> {
    let mut m = module("Sample");
    aspect("Sample.Trace").build(&mut m)?;
    let mut calc = ClassBuilder::new("Sample.Calc").public();
    if with_aspect {
        calc = calc.attribute(tag("Sample.Trace", "calc"));
    }
    calc.method(|m| adder(m, "Add")).build(&mut m)?;

    let path = dir.join("Sample.module.json");
    file::save_module(&m, &path)?;
    Ok(path)
}

#[test]
fn woven_file_runs_with_hooks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_sample(dir.path(), true)?;

    let outcome = WeaveTask::new(WeaveConfig::new(&path)).run()?;
    assert_eq!(outcome.emitted_aspects(), 1);

    let mut rt = runtime(file::load_module(&path)?)?;
    let log = Log::default();
    trace(&mut rt, "Sample.Trace", &log);
    let result = rt.call_static("Sample.Calc", "Add", vec![EmValue::I32(20), EmValue::I32(22)])?;
    assert_eq!(returned_i32(&result), Some(42));
    assert_eq!(log.of("OnExit"), vec!["calc"]);
    Ok(())
}

#[test]
fn rerun_is_reported_and_leaves_bytes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_sample(dir.path(), true)?;
    let task = WeaveTask::new(WeaveConfig::new(&path));

    assert!(matches!(task.run()?, WeaveOutcome::Woven(_)));
    let woven = fs::read(&path)?;
    assert_eq!(task.run()?, WeaveOutcome::AlreadyProcessed);
    assert_eq!(fs::read(&path)?, woven);
    Ok(())
}

#[test]
fn module_without_aspects_is_untouched() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_sample(dir.path(), false)?;
    let before = fs::read(&path)?;

    assert_eq!(WeaveTask::new(WeaveConfig::new(&path)).run()?, WeaveOutcome::NoAspects);
    assert_eq!(fs::read(&path)?, before);
    Ok(())
}

#[test]
fn no_staging_file_is_left_behind() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_sample(dir.path(), true)?;
    WeaveTask::new(WeaveConfig::new(&path)).run()?;

    let names: Vec<String> = fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["Sample.module.json"]);
    Ok(())
}

#[test]
fn failed_symbol_write_keeps_the_original_module() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_sample(dir.path(), true)?;
    let symbols_path = file::symbols_path(&path);
    SymbolFile::new("Sample").save(&symbols_path)?;
    let original = fs::read(&path)?;
    let original_symbols = fs::read(&symbols_path)?;
    fs::create_dir(dir.path().join("Sample.module.pdb.weaving"))?;

    let result = WeaveTask::new(WeaveConfig::new(&path)).run();
    assert!(matches!(result, Err(Error::FileError(_))));
    assert_eq!(fs::read(&path)?, original);
    assert_eq!(fs::read(&symbols_path)?, original_symbols);
    assert!(!dir.path().join("Sample.module.json.weaving").exists());
    Ok(())
}

#[test]
fn key_container_signs_the_output() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_sample(dir.path(), true)?;
    let store = dir.path().join("keys");
    fs::create_dir(&store)?;
    fs::write(store.join("build.snk"), b"container key material")?;

    WeaveTask::new(
        WeaveConfig::new(&path)
            .with_key_container("build")
            .with_key_store(&store),
    )
    .run()?;

    let key = SigningKey::from_container("build", Some(&store))?;
    let signed = file::load_module(&path)?;
    assert!(key.verify(&signed)?);
    assert_eq!(
        signed.strong_name.as_ref().map(|s| s.public_key_token.clone()),
        Some(key.public_key_token())
    );
    Ok(())
}

#[test]
fn conflicting_key_options_are_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_sample(dir.path(), true)?;
    let before = fs::read(&path)?;
    let result = WeaveTask::new(
        WeaveConfig::new(&path)
            .with_key_file(dir.path().join("a.snk"))
            .with_key_container("b"),
    )
    .run();

    assert!(matches!(result, Err(Error::InvalidConfig(_))));
    assert_eq!(fs::read(&path)?, before);
    Ok(())
}

#[test]
fn missing_module_is_an_io_error() {
    let result = WeaveTask::new(WeaveConfig::new("does/not/exist.module.json")).run();
    assert!(matches!(result, Err(Error::FileError(_))));
}

#[test]
fn symbols_follow_the_module() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_sample(dir.path(), true)?;
    let symbols_path = file::symbols_path(&path);
    SymbolFile::new("Sample").save(&symbols_path)?;

    WeaveTask::new(WeaveConfig::new(&path)).run()?;
    assert_eq!(SymbolFile::load(&symbols_path)?.module, "Sample");

    let disabled = tempfile::tempdir()?;
    let path = write_sample(disabled.path(), true)?;
    let symbols_path = file::symbols_path(&path);
    fs::write(&symbols_path, b"not json")?;
    WeaveTask::new(WeaveConfig::new(&path).with_symbols(false)).run()?;
    assert_eq!(fs::read(&symbols_path)?, b"not json");
    Ok(())
}
