//! JobSpec: a job script template with its resources and attributes
//!
//! A `JobSpec` holds the body template, the resources requested from the
//! scheduler (always including `jobname`), optional auxiliary scripts and
//! template variables, and per-job overrides of the execution attributes.
//! Anything not overridden falls back to the shared `JobDefaults`.
//!
//! Every mutation goes through a validating setter, so an invalid backend
//! name or resource key is rejected when it is set, whether it comes from
//! code or from a settings file.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use clusterjob_backends::{
    BackendError, BackendRegistry, Command, ResourceMap, ResourceValue, SchedulerBackend,
    StatusCode,
};

use crate::config::{
    load_settings_file, normalize_dir, validate_variable_name, AttributeOverrides, ConfigError,
    JobAttributes, JobDefaults, ATTRIBUTE_NAMES,
};
use crate::host::{
    expand_tilde, join_dir, remote_path_arg, set_executable, CommandRunner, ExecError, RemoteHost,
    ShellRunner,
};
use crate::poll::PollPolicy;
use crate::render::{RenderError, ScriptRenderer, TemplateContext};
use crate::state::{
    next_cache_id, CacheError, CacheStore, SubmissionError, SubmissionParts, SubmissionRecord,
};

/// Errors for job operations
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Prologue failed: {output}")]
    Prologue { output: String },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<BackendError> for JobError {
    fn from(e: BackendError) -> Self {
        JobError::Config(ConfigError::Backend(e))
    }
}

/// Shared collaborators of every job: defaults, backends and the command
/// runner
#[derive(Clone)]
pub struct JobEnvironment {
    pub defaults: Arc<JobDefaults>,
    pub registry: Arc<BackendRegistry>,
    pub runner: Arc<dyn CommandRunner>,
}

impl JobEnvironment {
    /// Check `defaults` against `registry` and bundle the three
    pub fn new(
        mut defaults: JobDefaults,
        registry: BackendRegistry,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, ConfigError> {
        defaults.attributes.normalize_dirs();
        defaults.validate(&registry)?;
        Ok(Self {
            defaults: Arc::new(defaults),
            registry: Arc::new(registry),
            runner,
        })
    }

    /// Built-in defaults and backends, real processes
    pub fn local() -> Result<Self, JobError> {
        let registry = BackendRegistry::builtin().map_err(|e| {
            ConfigError::ValidationError(format!("built-in backends: {}", e))
        })?;
        Ok(Self::new(JobDefaults::default(), registry, Arc::new(ShellRunner::new()))?)
    }
}

impl fmt::Debug for JobEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobEnvironment")
            .field("defaults", &self.defaults)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Options for [`JobSpec::submit`]
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Wait for the job to finish before returning
    pub block: bool,
    /// Cache key; None takes the next automatic id
    pub cache_id: Option<String>,
    /// Discard any cached entry and submit again
    pub force: bool,
    /// Resubmit when the cached entry is CANCELLED or FAILED
    pub retry: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            block: false,
            cache_id: None,
            force: false,
            retry: true,
        }
    }
}

/// A job script template plus everything needed to submit it
#[derive(Clone)]
pub struct JobSpec {
    body: String,
    resources: ResourceMap,
    aux_scripts: BTreeMap<String, String>,
    overrides: AttributeOverrides,
    variables: BTreeMap<String, String>,
    env: JobEnvironment,
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("resources", &self.resources)
            .field("aux_scripts", &self.aux_scripts.keys().collect::<Vec<_>>())
            .field("overrides", &self.overrides)
            .field("variables", &self.variables)
            .finish()
    }
}

impl JobSpec {
    pub fn new(
        body: impl Into<String>,
        jobname: &str,
        env: &JobEnvironment,
    ) -> Result<Self, JobError> {
        let mut job = Self {
            body: body.into(),
            resources: ResourceMap::new(),
            aux_scripts: BTreeMap::new(),
            overrides: AttributeOverrides::default(),
            variables: BTreeMap::new(),
            env: env.clone(),
        };
        job.set_resource("jobname", jobname)?;
        Ok(job)
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn jobname(&self) -> String {
        self.resources
            .get("jobname")
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    /// Resources set on this job, without any defaults
    pub fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    pub fn overrides(&self) -> &AttributeOverrides {
        &self.overrides
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    pub fn aux_scripts(&self) -> &BTreeMap<String, String> {
        &self.aux_scripts
    }

    /// Attributes with the overrides applied
    pub fn attributes(&self) -> JobAttributes {
        self.overrides.resolve(&self.env.defaults.attributes)
    }

    /// The backend named by the `backend` attribute
    pub fn backend(&self) -> Result<Arc<dyn SchedulerBackend>, ConfigError> {
        let name = self.attributes().backend;
        self.env
            .registry
            .get(&name)
            .ok_or(ConfigError::UnknownBackend(name))
    }

    /// This job's resources over the default resources over the backend's
    pub fn effective_resources(&self) -> Result<ResourceMap, ConfigError> {
        let backend = self.backend()?;
        Ok(self.merged_resources(backend.as_ref()))
    }

    fn merged_resources(&self, backend: &dyn SchedulerBackend) -> ResourceMap {
        let mut resources = self.resources.clone();
        resources.merge_defaults(&self.env.defaults.resources);
        resources.merge_defaults(&backend.default_resources());
        resources
    }

    // --- setters -----------------------------------------------------------

    pub fn set_resource(&mut self, key: &str, value: impl Into<ResourceValue>) -> Result<(), ConfigError> {
        let value = value.into();
        if key == "jobname" && value.to_string().trim().is_empty() {
            return Err(BackendError::InvalidResource {
                key: key.to_string(),
                reason: "job name cannot be empty".to_string(),
            }
            .into());
        }
        self.resources.insert(key, value)?;
        Ok(())
    }

    /// Drop a resource; `jobname` cannot be removed
    pub fn remove_resource(&mut self, key: &str) -> Result<Option<ResourceValue>, ConfigError> {
        if key == "jobname" {
            return Err(BackendError::InvalidResource {
                key: key.to_string(),
                reason: "every job needs a name".to_string(),
            }
            .into());
        }
        Ok(self.resources.remove(key))
    }

    /// Set an extra template variable.
    ///
    /// Attribute names and `fulldir` are reserved.
    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) -> Result<(), ConfigError> {
        validate_variable_name(name)?;
        if name == "fulldir" || ATTRIBUTE_NAMES.contains(&name) {
            return Err(ConfigError::InvalidVariable(name.to_string()));
        }
        self.variables.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Add a script rendered and written next to the job script
    pub fn add_aux_script(&mut self, name: &str, template: impl Into<String>) -> Result<(), ConfigError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(ConfigError::InvalidAttribute {
                name: "aux_script".to_string(),
                reason: format!("'{}' is not a plain file name", name),
            });
        }
        self.aux_scripts.insert(name.to_string(), template.into());
        Ok(())
    }

    pub fn set_backend(&mut self, name: &str) -> Result<(), ConfigError> {
        if !self.env.registry.contains(name) {
            return Err(ConfigError::UnknownBackend(name.to_string()));
        }
        self.overrides.backend = Some(name.to_string());
        Ok(())
    }

    pub fn set_shell(&mut self, shell: &str) -> Result<(), ConfigError> {
        self.overrides.shell = Some(non_empty("shell", shell)?);
        Ok(())
    }

    /// Submit on `remote` over ssh, or locally with None
    pub fn set_remote(&mut self, remote: Option<&str>) -> Result<(), ConfigError> {
        let remote = remote.map(|host| non_empty("remote", host)).transpose()?;
        self.overrides.remote = Some(remote);
        Ok(())
    }

    /// Surrounding whitespace and trailing separators are dropped
    pub fn set_rootdir(&mut self, rootdir: &str) {
        self.overrides.rootdir = Some(normalize_dir(rootdir));
    }

    pub fn set_workdir(&mut self, workdir: &str) {
        self.overrides.workdir = Some(normalize_dir(workdir));
    }

    pub fn set_filename(&mut self, filename: Option<&str>) -> Result<(), ConfigError> {
        let filename = filename.map(|f| non_empty("filename", f)).transpose()?;
        self.overrides.filename = Some(filename);
        Ok(())
    }

    pub fn set_prologue(&mut self, template: &str) {
        self.overrides.prologue = Some(template.to_string());
    }

    pub fn set_epilogue(&mut self, template: &str) {
        self.overrides.epilogue = Some(template.to_string());
    }

    pub fn set_sleep_interval(&mut self, seconds: Option<u64>) {
        self.overrides.sleep_interval = Some(seconds);
    }

    pub fn set_max_sleep_interval(&mut self, seconds: u64) -> Result<(), ConfigError> {
        if seconds == 0 {
            return Err(ConfigError::InvalidAttribute {
                name: "max_sleep_interval".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        self.overrides.max_sleep_interval = Some(seconds);
        Ok(())
    }

    pub fn set_min_sleep_interval(&mut self, seconds: u64) {
        self.overrides.min_sleep_interval = Some(seconds);
    }

    pub fn set_ssh(&mut self, ssh: &str) -> Result<(), ConfigError> {
        self.overrides.ssh = Some(non_empty("ssh", ssh)?);
        Ok(())
    }

    pub fn set_scp(&mut self, scp: &str) -> Result<(), ConfigError> {
        self.overrides.scp = Some(non_empty("scp", scp)?);
        Ok(())
    }

    /// Cache submissions in `folder`, or disable caching with None
    pub fn set_cache_folder(&mut self, folder: Option<&str>) -> Result<(), ConfigError> {
        let folder = folder.map(|f| non_empty("cache_folder", f)).transpose()?;
        self.overrides.cache_folder = Some(folder);
        Ok(())
    }

    pub fn set_cache_prefix(&mut self, prefix: &str) -> Result<(), ConfigError> {
        CacheStore::new("", prefix).map_err(|e| ConfigError::InvalidAttribute {
            name: "cache_prefix".to_string(),
            reason: e.to_string(),
        })?;
        self.overrides.cache_prefix = Some(prefix.to_string());
        Ok(())
    }

    /// Set an attribute from a settings value (string, integer or null)
    pub fn set_attribute(&mut self, name: &str, value: &Value) -> Result<(), ConfigError> {
        match name {
            "backend" => self.set_backend(expect_str(name, value)?),
            "shell" => self.set_shell(expect_str(name, value)?),
            "remote" => self.set_remote(expect_opt_str(name, value)?),
            "rootdir" => {
                self.set_rootdir(expect_str(name, value)?);
                Ok(())
            }
            "workdir" => {
                self.set_workdir(expect_str(name, value)?);
                Ok(())
            }
            "filename" => self.set_filename(expect_opt_str(name, value)?),
            "prologue" => {
                self.set_prologue(expect_str(name, value)?);
                Ok(())
            }
            "epilogue" => {
                self.set_epilogue(expect_str(name, value)?);
                Ok(())
            }
            "sleep_interval" => {
                let seconds = if value.is_null() {
                    None
                } else {
                    Some(expect_u64(name, value)?)
                };
                self.set_sleep_interval(seconds);
                Ok(())
            }
            "max_sleep_interval" => self.set_max_sleep_interval(expect_u64(name, value)?),
            "min_sleep_interval" => {
                self.set_min_sleep_interval(expect_u64(name, value)?);
                Ok(())
            }
            "ssh" => self.set_ssh(expect_str(name, value)?),
            "scp" => self.set_scp(expect_str(name, value)?),
            "cache_folder" => self.set_cache_folder(expect_opt_str(name, value)?),
            "cache_prefix" => self.set_cache_prefix(expect_str(name, value)?),
            _ => Err(ConfigError::InvalidAttribute {
                name: name.to_string(),
                reason: format!("unknown attribute, expected one of: {}", ATTRIBUTE_NAMES.join(", ")),
            }),
        }
    }

    /// Apply a TOML settings file to this job through the setters
    pub fn read_settings(&mut self, path: &Path) -> Result<(), ConfigError> {
        let (value, _digest) = load_settings_file(path)?;
        self.apply_settings(&value)?;
        debug!(path = %path.display(), "settings applied to job");
        Ok(())
    }

    /// Apply an `{attributes, resources, variables}` settings value
    pub fn apply_settings(&mut self, value: &Value) -> Result<(), ConfigError> {
        if let Some(attributes) = value.get("attributes").and_then(Value::as_object) {
            for (name, v) in attributes {
                self.set_attribute(name, v)?;
            }
        }
        if let Some(resources) = value.get("resources").and_then(Value::as_object) {
            for (key, v) in resources {
                let resource = resource_from_json(key, v)?;
                self.set_resource(key, resource)?;
            }
        }
        if let Some(variables) = value.get("variables").and_then(Value::as_object) {
            for (name, v) in variables {
                let text = v.as_str().ok_or_else(|| ConfigError::InvalidVariable(name.clone()))?;
                self.set_variable(name, text)?;
            }
        }
        Ok(())
    }

    // --- rendering ---------------------------------------------------------

    /// The job script as it will be submitted
    pub fn render(&self) -> Result<String, JobError> {
        self.render_script(&self.body, true)
    }

    /// Render any template in this job's context; `primary` adds the
    /// resource header
    pub fn render_script(&self, template: &str, primary: bool) -> Result<String, JobError> {
        let attributes = self.attributes();
        let backend = self.backend()?;
        let resources = self.merged_resources(backend.as_ref());
        let fulldir = attributes.fulldir();
        let context = TemplateContext {
            resources: &resources,
            overrides: &self.overrides,
            variables: &self.variables,
            fulldir: &fulldir,
            defaults: &self.env.defaults,
        };
        let renderer = ScriptRenderer::new(backend.as_ref(), &attributes.shell, context);
        Ok(renderer.render(template, primary)?)
    }

    /// Script file name: the `filename` attribute, else
    /// `<jobname>.<backend extension>`
    pub fn script_filename(&self) -> Result<String, ConfigError> {
        match self.attributes().filename {
            Some(filename) => Ok(filename),
            None => Ok(format!("{}.{}", self.jobname(), self.backend()?.extension())),
        }
    }

    /// Where the job script goes on the submission host
    pub fn script_path(&self) -> Result<String, ConfigError> {
        let filename = self.script_filename()?;
        if filename.starts_with('/') || filename.starts_with('~') {
            return Ok(filename);
        }
        let dir = self.attributes().fulldir();
        Ok(join_dir(&dir, &filename))
    }

    /// Write the rendered job script and auxiliary scripts.
    ///
    /// Without `path` the script goes to `rootdir/workdir/filename`, on the
    /// remote host if one is set. With `path` it is written to that local
    /// file. Missing directories are created. Returns the script path.
    pub fn write(&self, path: Option<&Path>) -> Result<String, JobError> {
        let attributes = self.attributes();
        let (target, remote) = match path {
            Some(p) => (p.to_string_lossy().into_owned(), None),
            None => (self.script_path()?, self.remote_host(&attributes)),
        };

        let mut files = vec![(target.clone(), self.render()?)];
        let dir = Path::new(&target)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        for (name, template) in &self.aux_scripts {
            files.push((join_dir(&dir, name), self.render_script(template, false)?));
        }

        match &remote {
            None => {
                if !dir.is_empty() {
                    fs::create_dir_all(expand_tilde(&dir))?;
                }
                for (file, text) in &files {
                    let local = expand_tilde(file);
                    fs::write(&local, text)?;
                    set_executable(&local)?;
                    debug!(path = %local.display(), "script written");
                }
            }
            Some(host) => {
                if !dir.is_empty() {
                    let mkdir = Command::shell(format!("mkdir -p {}", remote_path_arg(&dir)));
                    self.env.runner.run(&mkdir, Some(host), "", "", false)?;
                }
                for (file, text) in &files {
                    self.upload(host, file, text)?;
                }
            }
        }
        Ok(target)
    }

    fn upload(&self, host: &RemoteHost, remote_path: &str, text: &str) -> Result<(), JobError> {
        let mut temp = tempfile::Builder::new()
            .prefix("clusterjob-")
            .tempfile()?;
        temp.write_all(text.as_bytes())?;
        temp.flush()?;
        set_executable(temp.path())?;
        self.env.runner.upload(temp.path(), host, remote_path)?;
        debug!(host = %host.host, path = remote_path, "script uploaded");
        Ok(())
    }

    fn remote_host(&self, attributes: &JobAttributes) -> Option<RemoteHost> {
        attributes.remote.as_ref().map(|host| {
            RemoteHost::new(host.clone()).with_clients(attributes.ssh.clone(), attributes.scp.clone())
        })
    }

    fn cache_store(&self, attributes: &JobAttributes) -> Result<Option<CacheStore>, CacheError> {
        attributes
            .cache_folder
            .as_ref()
            .map(|folder| CacheStore::new(expand_tilde(folder), attributes.cache_prefix.clone()))
            .transpose()
    }

    /// Render and run the prologue locally; an empty prologue is skipped
    fn run_prologue(&self, attributes: &JobAttributes) -> Result<(), JobError> {
        if attributes.prologue.trim().is_empty() {
            return Ok(());
        }
        let script = self.render_script(&attributes.prologue, false)?;
        match self.env.runner.run_script(&script) {
            Ok(_) => Ok(()),
            Err(e) => {
                let output = e.output().map(str::to_string).unwrap_or_else(|| e.to_string());
                let cwd = std::env::current_dir()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                error!(
                    cwd = %cwd,
                    "Prologue script did not exit cleanly\nprologue: ---\n{}\n---\nresponse: ---\n{}\n---",
                    attributes.prologue,
                    output
                );
                Err(JobError::Prologue { output })
            }
        }
    }

    /// The epilogue rendered with the current attributes, None when empty
    pub fn render_epilogue(&self) -> Result<Option<String>, JobError> {
        let attributes = self.attributes();
        if attributes.epilogue.trim().is_empty() {
            return Ok(None);
        }
        self.render_script(&attributes.epilogue, false).map(Some)
    }

    /// Submit the job and return its submission record.
    ///
    /// With caching enabled an existing entry under the cache id is reused
    /// instead of submitting again, unless `force` is set, or `retry` is set
    /// and the cached job was cancelled or failed. A submission the
    /// scheduler rejects is not an error: the record is FAILED with an empty
    /// job id.
    pub fn submit(&self, options: SubmitOptions) -> Result<SubmissionRecord, JobError> {
        let attributes = self.attributes();
        let backend = self.backend()?;
        let jobname = self.jobname();
        match &attributes.remote {
            Some(host) => info!(job = %jobname, remote = %host, "submitting job"),
            None => info!(job = %jobname, "submitting job locally"),
        }

        let cache_id = options.cache_id.clone().unwrap_or_else(next_cache_id);
        let mut location = None;
        if let Some(store) = self.cache_store(&attributes)? {
            store.ensure_folder()?;
            if options.force {
                store.remove(&cache_id)?;
            } else if let Some(entry) = store.load(&cache_id)? {
                if options.retry && entry.status.is_unsuccessful() {
                    debug!(cache_id = %cache_id, status = %entry.status, "cached run unsuccessful, resubmitting");
                    store.remove(&cache_id)?;
                } else {
                    debug!(cache_id = %cache_id, job_id = %entry.job_id, "reusing cached submission");
                    let location = store.location(&cache_id)?;
                    let mut record = SubmissionRecord::from_entry(
                        entry,
                        Some(location),
                        &self.env.registry,
                        Arc::clone(&self.env.runner),
                    )?;
                    record.dump()?;
                    if options.block {
                        record.get(None)?;
                    }
                    return Ok(record);
                }
            }
            location = Some(store.location(&cache_id)?);
        }

        self.run_prologue(&attributes)?;
        let resources = self.merged_resources(backend.as_ref());
        let policy = PollPolicy::for_job(&attributes, &resources)?;
        let epilogue = self.render_epilogue()?;
        self.write(None)?;

        let remote = self.remote_host(&attributes);
        let command = backend.submit_command(&self.script_filename()?);
        let submitted = self.env.runner.run(
            &command,
            remote.as_ref(),
            &attributes.rootdir,
            &attributes.workdir,
            false,
        );
        let (job_id, status) = match submitted {
            Ok(output) => match backend.parse_job_id(&output) {
                Some(job_id) => {
                    info!(job = %jobname, job_id = %job_id, "job submitted");
                    (job_id, StatusCode::Pending)
                }
                None => {
                    error!(job = %jobname, output = %output.trim(), "Failed to submit job: no job id in output");
                    (String::new(), StatusCode::Failed)
                }
            },
            Err(e) => {
                error!(job = %jobname, error = %e, "Failed to submit job");
                (String::new(), StatusCode::Failed)
            }
        };

        let mut record = SubmissionRecord::from_parts(SubmissionParts {
            backend,
            runner: Arc::clone(&self.env.runner),
            remote,
            resources,
            policy,
            job_id,
            status,
            epilogue,
            cache: location,
        });
        // Persisted before any blocking wait
        record.dump()?;
        if options.block {
            record.get(None)?;
        }
        Ok(record)
    }
}

fn non_empty(name: &str, value: &str) -> Result<String, ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::InvalidAttribute {
            name: name.to_string(),
            reason: "cannot be empty".to_string(),
        });
    }
    Ok(value.to_string())
}

fn expect_str<'a>(name: &str, value: &'a Value) -> Result<&'a str, ConfigError> {
    value.as_str().ok_or_else(|| ConfigError::InvalidAttribute {
        name: name.to_string(),
        reason: format!("expected a string, got {}", value),
    })
}

fn expect_opt_str<'a>(name: &str, value: &'a Value) -> Result<Option<&'a str>, ConfigError> {
    if value.is_null() {
        Ok(None)
    } else {
        expect_str(name, value).map(Some)
    }
}

fn expect_u64(name: &str, value: &Value) -> Result<u64, ConfigError> {
    value.as_u64().ok_or_else(|| ConfigError::InvalidAttribute {
        name: name.to_string(),
        reason: format!("expected a non-negative integer, got {}", value),
    })
}

/// Resource values from settings: strings, integers and booleans
pub fn resource_from_json(key: &str, value: &Value) -> Result<ResourceValue, ConfigError> {
    match value {
        Value::String(s) => Ok(ResourceValue::from(s.as_str())),
        Value::Bool(b) => Ok(ResourceValue::from(*b)),
        Value::Number(n) => n.as_i64().map(ResourceValue::from).ok_or_else(|| {
            ConfigError::from(BackendError::InvalidResource {
                key: key.to_string(),
                reason: format!("{} is not an integer", n),
            })
        }),
        other => Err(ConfigError::from(BackendError::InvalidResource {
            key: key.to_string(),
            reason: format!("unsupported value {}", other),
        })),
    }
}
