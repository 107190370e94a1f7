// Copyright (c) The apitest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration support for run-api-tests.
//!
//! Configuration is read as TOML. The embedded [default config](ApiTestConfig::DEFAULT_CONFIG) is
//! always present; repository-specific configuration is layered on top of it, key by key.

mod test_threads;
pub use test_threads::*;

use crate::errors::{ConfigParseError, ProfileNotFound};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{collections::HashMap, sync::LazyLock, time::Duration};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for run-api-tests.
///
/// Runner settings are managed through profiles, obtained through the [`profile`](Self::profile)
/// method.
#[derive(Clone, Debug)]
pub struct ApiTestConfig {
    binaries: Vec<String>,
    target: TargetConfig,
    env: IndexMap<String, String>,
    default_profile: DefaultProfileImpl,
    other_profiles: HashMap<String, CustomProfileImpl>,
}

impl ApiTestConfig {
    /// The default location of the config within the path passed to
    /// [`from_sources`](Self::from_sources).
    pub const CONFIG_PATH: &'static str = ".config/apitest.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the config from the given file, or if not specified from `.config/apitest.toml` under
    /// `config_root`.
    ///
    /// If the file isn't specified and the directory doesn't have `.config/apitest.toml`, uses the
    /// default config options.
    pub fn from_sources(
        config_root: &Utf8Path,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = config_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        Self::build_and_deserialize(builder, &config_file)
    }

    /// Parses the config from a TOML string layered on top of the default config. Used for
    /// testing.
    pub fn from_str_for_test(contents: &str) -> Result<Self, ConfigParseError> {
        let builder =
            Self::make_default_config().add_source(File::from_str(contents, FileFormat::Toml));
        Self::build_and_deserialize(builder, Utf8Path::new("<string>"))
    }

    /// Returns the default config.
    pub fn default_config() -> Self {
        Self::build_and_deserialize(Self::make_default_config(), Utf8Path::new("<default>"))
            .expect("default config is always valid")
    }

    /// Returns the profile with the given name, or an error if a profile was specified but not
    /// found.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<ApiTestProfile<'_>, ProfileNotFound> {
        let name = name.as_ref();
        let custom_profile = match name {
            Self::DEFAULT_PROFILE => None,
            other => Some(self.other_profiles.get(other).ok_or_else(|| {
                ProfileNotFound::new(name, self.all_profiles().map(|s| s.to_owned()))
            })?),
        };

        Ok(ApiTestProfile {
            name: name.to_owned(),
            default_profile: &self.default_profile,
            custom_profile,
        })
    }

    /// Returns the names of all known profiles.
    pub fn all_profiles(&self) -> impl Iterator<Item = &str> + '_ {
        std::iter::once(Self::DEFAULT_PROFILE).chain(self.other_profiles.keys().map(|s| s.as_str()))
    }

    /// Returns the names of the test binaries to run, relative to the build directory.
    pub fn binaries(&self) -> &[String] {
        &self.binaries
    }

    /// Returns the `[target]` section.
    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Returns the environment variables injected into every test binary invocation, before any
    /// prefix is applied.
    pub fn env(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.env
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Resolves the configured binary names against `build_dir`.
    ///
    /// Names without an extension get the platform's executable suffix appended.
    pub fn resolve_binaries(&self, build_dir: &Utf8Path) -> Vec<Utf8PathBuf> {
        self.binaries
            .iter()
            .map(|name| {
                let mut path = build_dir.join(name);
                if path.extension().is_none() && !std::env::consts::EXE_EXTENSION.is_empty() {
                    path.set_extension(std::env::consts::EXE_EXTENSION);
                }
                path
            })
            .collect()
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize(
        builder: ConfigBuilder<DefaultState>,
        config_file: &Utf8Path,
    ) -> Result<Self, ConfigParseError> {
        let config: ApiTestConfigDeserialize = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|err| ConfigParseError::new(config_file, err))?;
        Ok(config.into_config())
    }
}

/// A run-api-tests profile, containing settings for how tests are run.
#[derive(Clone, Debug)]
pub struct ApiTestProfile<'cfg> {
    name: String,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

impl ApiTestProfile<'_> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of tests to run simultaneously.
    pub fn test_threads(&self) -> TestThreads {
        self.custom_profile
            .and_then(|profile| profile.test_threads)
            .unwrap_or(self.default_profile.test_threads)
    }

    /// Returns the per-test timeout.
    pub fn timeout(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.timeout)
            .unwrap_or(self.default_profile.timeout)
    }

    /// Returns how long to wait for output to close after a test exits.
    pub fn leak_timeout(&self) -> Duration {
        self.custom_profile
            .and_then(|profile| profile.leak_timeout)
            .unwrap_or(self.default_profile.leak_timeout)
    }

    /// Returns whether tests marked `DISABLED_` are run.
    pub fn run_disabled(&self) -> bool {
        self.custom_profile
            .and_then(|profile| profile.run_disabled)
            .unwrap_or(self.default_profile.run_disabled)
    }
}

/// The `[target]` section of the config.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    #[serde(default)]
    runner: Vec<String>,
    #[serde(default)]
    env_prefix: Option<String>,
    #[serde(default)]
    setup: Vec<String>,
    #[serde(default)]
    teardown: Vec<String>,
}

impl TargetConfig {
    /// Returns the argv prefix wrapping every test binary invocation.
    pub fn runner(&self) -> &[String] {
        &self.runner
    }

    /// Returns the prefix applied to injected environment variables, if any.
    pub fn env_prefix(&self) -> Option<&str> {
        self.env_prefix.as_deref().filter(|prefix| !prefix.is_empty())
    }

    /// Returns the command run when the execution target is acquired.
    pub fn setup(&self) -> &[String] {
        &self.setup
    }

    /// Returns the command run when the execution target is released.
    pub fn teardown(&self) -> &[String] {
        &self.teardown
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ApiTestConfigDeserialize {
    #[serde(default)]
    binaries: Vec<String>,
    #[serde(default)]
    target: TargetConfig,
    #[serde(default)]
    env: IndexMap<String, String>,
    #[serde(rename = "profile")]
    profiles: HashMap<String, CustomProfileImpl>,
}

impl ApiTestConfigDeserialize {
    fn into_config(mut self) -> ApiTestConfig {
        let default_profile = self
            .profiles
            .remove(ApiTestConfig::DEFAULT_PROFILE)
            .expect("default profile should exist");
        ApiTestConfig {
            binaries: self.binaries,
            target: self.target,
            env: self.env,
            default_profile: DefaultProfileImpl::new(default_profile),
            other_profiles: self.profiles,
        }
    }
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    test_threads: TestThreads,
    timeout: Duration,
    leak_timeout: Duration,
    run_disabled: bool,
}

impl DefaultProfileImpl {
    fn new(p: CustomProfileImpl) -> Self {
        Self {
            test_threads: p
                .test_threads
                .expect("test-threads present in default profile"),
            timeout: p.timeout.expect("timeout present in default profile"),
            leak_timeout: p
                .leak_timeout
                .expect("leak-timeout present in default profile"),
            run_disabled: p
                .run_disabled
                .expect("run-disabled present in default profile"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default)]
    test_threads: Option<TestThreads>,
    #[serde(default, with = "humantime_serde::option")]
    timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde::option")]
    leak_timeout: Option<Duration>,
    #[serde(default)]
    run_disabled: Option<bool>,
}
