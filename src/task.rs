//! The build-step entry point.
//!
//! [`WeaveTask`] runs one complete weave of a module file: load, resolve references, rewrite,
//! optionally sign, then replace the module and its debug symbols on disk. Nothing is
//! written unless every step before saving succeeded.

use std::time::Instant;

use crate::{
    config::WeaveConfig,
    file::{self, symbols::SymbolFile},
    resolver::Resolver,
    weaver::{WeaveOutcome, Weaver},
    Result,
};

/// One weave run over the module named by a [`WeaveConfig`]
#[derive(Debug, Clone)]
pub struct WeaveTask {
    config: WeaveConfig,
}

impl WeaveTask {
    /// A task for `config`
    #[must_use]
    pub fn new(config: WeaveConfig) -> Self {
        WeaveTask { config }
    }

    /// The configuration the task runs with
    #[must_use]
    pub fn config(&self) -> &WeaveConfig {
        &self.config
    }

    /// Weaves the module in place.
    ///
    /// A module that already carries the synthesized initializer is left alone and reported
    /// as [`WeaveOutcome::AlreadyProcessed`]. A module without effective aspects is left
    /// alone with a warning.
    ///
    /// # Errors
    /// Any configuration, loading, resolution, weaving, signing or I/O error. The module
    /// file is unchanged when an error is returned.
    pub fn run(&self) -> Result<WeaveOutcome> {
        let started = Instant::now();
        let config = &self.config;
        config.validate()?;

        let mut module = file::load_module(&config.module)?;
        log::info!("Loaded {} from {}", module.name, config.module.display());

        let resolver = Resolver::with_references(&config.references)?;
        let key = config.signing_key()?;

        let symbols_path = config.symbols_path();
        let mut symbols = if config.symbols && symbols_path.is_file() {
            Some(SymbolFile::load(&symbols_path)?)
        } else {
            None
        };

        let outcome = Weaver::new(&resolver).weave(&mut module)?;
        let report = match &outcome {
            WeaveOutcome::Woven(report) => report,
            WeaveOutcome::NoAspects => {
                log::warn!(
                    "No aspects detected in {}. The weaving step can be removed for this module to speed up the build.",
                    config.module.display()
                );
                return Ok(outcome);
            }
            WeaveOutcome::AlreadyProcessed => return Ok(outcome),
        };
        log::info!(
            "Wove {} aspect instances into {} members of {}",
            report.emitted_aspects,
            report.members.len(),
            report.module
        );

        if let Some(key) = &key {
            key.sign(&mut module)?;
        }

        let module_data = serde_json::to_vec_pretty(&module)?;
        let symbols_data = match symbols.as_mut() {
            Some(symbols) => {
                let mut moved = 0;
                for member in &report.members {
                    if let Some(split) = &member.split {
                        moved += symbols.remap(member.plan.token, split);
                    }
                }
                log::debug!("{} sequence points moved behind constructor calls", moved);
                Some(serde_json::to_vec_pretty(symbols)?)
            }
            None => None,
        };

        // the module goes last, a woven module marks the run as done
        let mut outputs = Vec::with_capacity(2);
        if let Some(data) = &symbols_data {
            outputs.push((symbols_path.as_path(), data.as_slice()));
        }
        outputs.push((config.module.as_path(), module_data.as_slice()));
        file::write_all_atomic(&outputs)?;
        log::info!("Saved {}", config.module.display());
        if symbols_data.is_some() {
            log::debug!("Rewrote {}", symbols_path.display());
        }

        log::info!("Weaving {} took {}ms", module.name, started.elapsed().as_millis());
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::Path};

    use super::*;
    use crate::{
        assembly::BlockId,
        file::symbols::SequencePoint,
        metadata::{customattributes::CustomAttribute, module::Module, signatures::TypeRef},
        signing::SigningKey,
        test::FixtureModule,
        Error,
    };

    fn woven_fixture() -> Result<Module> {
        FixtureModule::new("Sample")
            .aspect("Sample.LogAspect")
            .class("Sample.Calc", |c| {
                c.attribute(CustomAttribute::new(TypeRef::local("Sample.LogAspect")))
                    .adder("Add")
            })
            .build()
    }

    fn write(module: &Module, dir: &Path) -> Result<std::path::PathBuf> {
        let path = dir.join("Sample.module.json");
        file::save_module(module, &path)?;
        Ok(path)
    }

    #[test]
    fn test_run_weaves_and_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(&woven_fixture()?, dir.path())?;
        let task = WeaveTask::new(WeaveConfig::new(&path));

        let first = task.run()?;
        assert_eq!(first.emitted_aspects(), 1);
        let woven = fs::read(&path)?;

        assert_eq!(task.run()?, WeaveOutcome::AlreadyProcessed);
        assert_eq!(fs::read(&path)?, woven);
        Ok(())
    }

    #[test]
    fn test_run_without_aspects_leaves_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let module = FixtureModule::new("Sample")
            .class("Sample.Calc", |c| c.adder("Add"))
            .build()?;
        let path = write(&module, dir.path())?;
        let before = fs::read(&path)?;

        assert_eq!(WeaveTask::new(WeaveConfig::new(&path)).run()?, WeaveOutcome::NoAspects);
        assert_eq!(fs::read(&path)?, before);
        Ok(())
    }

    #[test]
    fn test_run_signs_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(&woven_fixture()?, dir.path())?;
        let key_path = dir.path().join("Sample.snk");
        fs::write(&key_path, [1u8, 2, 3, 4, 5, 6, 7, 8])?;

        WeaveTask::new(WeaveConfig::new(&path).with_key_file(&key_path)).run()?;
        let signed = file::load_module(&path)?;
        assert!(SigningKey::from_file(&key_path)?.verify(&signed)?);
        Ok(())
    }

    #[test]
    fn test_run_bad_key_writes_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(&woven_fixture()?, dir.path())?;
        let before = fs::read(&path)?;
        let pfx = dir.path().join("Sample.pfx");
        fs::write(&pfx, b"pkcs12")?;

        let result = WeaveTask::new(WeaveConfig::new(&path).with_key_file(&pfx)).run();
        assert!(matches!(result, Err(Error::SigningKey(_))));
        assert_eq!(fs::read(&path)?, before);
        Ok(())
    }

    #[test]
    fn test_run_rewrites_symbols() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let module = woven_fixture()?;
        let path = write(&module, dir.path())?;
        let add = module
            .find_type("Sample.Calc")
            .map(|ty| ty.methods[0])
            .ok_or_else(|| malformed_error!("missing Calc"))?;

        let mut symbols = SymbolFile::new("Sample");
        symbols.add_point(
            add,
            SequencePoint {
                block: BlockId(0),
                index: 0,
                document: "Calc.cs".into(),
                line: 7,
            },
        );
        let symbols_path = file::symbols_path(&path);
        symbols.save(&symbols_path)?;

        WeaveTask::new(WeaveConfig::new(&path)).run()?;
        let rewritten = SymbolFile::load(&symbols_path)?;
        assert_eq!(rewritten.method(add).map(|m| m.points[0].line), Some(7));
        Ok(())
    }

    #[test]
    fn test_run_missing_reference() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write(&woven_fixture()?, dir.path())?;
        let result = WeaveTask::new(
            WeaveConfig::new(&path).with_reference(dir.path().join("Missing.module.json")),
        )
        .run();
        assert!(matches!(result, Err(Error::AssemblyResolution(_))));
        Ok(())
    }
}
