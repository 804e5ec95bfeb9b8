//! Job descriptors.
//!
//! This module defines the identity and deployment descriptors that flow
//! between the master-published desired state and the agent's committed
//! executions: [`JobId`], [`Job`], [`Goal`], [`Task`], and [`Execution`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Stable identity of a job: name, version, and a content hash over the
/// full descriptor. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId {
    name: String,
    version: String,
    hash: String,
}

impl JobId {
    /// Create a job id from its parts.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            hash: hash.into(),
        }
    }

    /// The job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The job version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The content hash of the job descriptor.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.version, self.hash)
    }
}

/// Error returned when parsing a [`JobId`] from its canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed job id \"{0}\": expected name:version:hash")]
pub struct ParseJobIdError(String);

impl FromStr for JobId {
    type Err = ParseJobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [name, version, hash] if !name.is_empty() && !version.is_empty() && !hash.is_empty() => {
                Ok(Self::new(*name, *version, *hash))
            },
            _ => Err(ParseJobIdError(s.to_string())),
        }
    }
}

// Serialized as the canonical `name:version:hash` string so that maps keyed
// by JobId remain plain JSON objects.
impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A single container port mapping.
///
/// `external_port` is `None` for dynamically allocated ports and `Some` for
/// statically assigned ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port inside the container.
    pub internal_port: u16,

    /// Fixed host port, if statically assigned.
    pub external_port: Option<u16>,
}

impl PortMapping {
    /// A mapping whose host port is chosen by the agent's port allocator.
    #[must_use]
    pub const fn dynamic(internal_port: u16) -> Self {
        Self {
            internal_port,
            external_port: None,
        }
    }

    /// A mapping with a fixed host port.
    #[must_use]
    pub const fn fixed(internal_port: u16, external_port: u16) -> Self {
        Self {
            internal_port,
            external_port: Some(external_port),
        }
    }
}

/// Immutable job descriptor: what to run and which ports it needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Stable identity, derived from the descriptor content.
    pub id: JobId,

    /// Container image reference.
    pub image: String,

    /// Command to execute inside the container.
    pub command: Vec<String>,

    /// Named port mappings.
    pub ports: BTreeMap<String, PortMapping>,
}

impl Job {
    /// Create a new builder for `Job`.
    #[must_use]
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }
}

/// Builder for [`Job`]. The job id is derived from the descriptor content
/// at [`build`](JobBuilder::build) time.
#[derive(Debug, Default)]
pub struct JobBuilder {
    name: Option<String>,
    version: Option<String>,
    image: Option<String>,
    command: Vec<String>,
    ports: BTreeMap<String, PortMapping>,
}

impl JobBuilder {
    /// Set the job name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the job version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the container image.
    #[must_use]
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set the command to execute.
    #[must_use]
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Add a named port mapping.
    #[must_use]
    pub fn port(mut self, name: impl Into<String>, mapping: PortMapping) -> Self {
        self.ports.insert(name.into(), mapping);
        self
    }

    /// Build the `Job`.
    ///
    /// # Panics
    ///
    /// Panics if `name`, `version`, or `image` is not set.
    #[must_use]
    pub fn build(self) -> Job {
        let name = self.name.expect("name is required");
        let version = self.version.expect("version is required");
        let image = self.image.expect("image is required");
        let hash = descriptor_hash(&name, &version, &image, &self.command, &self.ports);
        Job {
            id: JobId::new(name, version, hash),
            image,
            command: self.command,
            ports: self.ports,
        }
    }
}

/// Hash the descriptor content into a short stable hex digest.
fn descriptor_hash(
    name: &str,
    version: &str,
    image: &str,
    command: &[String],
    ports: &BTreeMap<String, PortMapping>,
) -> String {
    let mut hasher = Sha256::new();
    for field in [name, version, image] {
        hasher.update(field.as_bytes());
        hasher.update([0]);
    }
    for arg in command {
        hasher.update(arg.as_bytes());
        hasher.update([0]);
    }
    for (port_name, mapping) in ports {
        hasher.update(port_name.as_bytes());
        hasher.update(mapping.internal_port.to_be_bytes());
        match mapping.external_port {
            Some(port) => {
                hasher.update([1]);
                hasher.update(port.to_be_bytes());
            },
            None => hasher.update([0]),
        }
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// Desired lifecycle target for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    /// The supervisor should be running the container.
    Start,

    /// The supervisor should exist but keep the container stopped.
    Stop,

    /// The supervisor should stop the container and then be discarded.
    Undeploy,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Undeploy => write!(f, "undeploy"),
        }
    }
}

/// A desired row in the master-published deployment table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// The job descriptor.
    pub job: Job,

    /// The desired lifecycle target.
    pub goal: Goal,
}

impl Task {
    /// Create a task for a job with the given goal.
    #[must_use]
    pub const fn new(job: Job, goal: Goal) -> Self {
        Self { job, goal }
    }
}

/// A committed row owned by this agent: the frozen job descriptor, the
/// current goal, and the port allocation chosen when the execution was
/// born.
///
/// Once an execution exists its job and ports never change; only the goal
/// is rewritten, and only by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    /// The frozen job descriptor.
    pub job: Job,

    /// The current lifecycle goal.
    pub goal: Goal,

    /// Concrete host port per port name, fixed for the execution lifetime.
    pub ports: BTreeMap<String, u16>,
}

impl Execution {
    /// Create an execution for a job with goal [`Goal::Start`] and no
    /// ports. Use [`with_goal`](Self::with_goal) and
    /// [`with_ports`](Self::with_ports) to fill in the rest.
    #[must_use]
    pub const fn of(job: Job) -> Self {
        Self {
            job,
            goal: Goal::Start,
            ports: BTreeMap::new(),
        }
    }

    /// Replace the goal.
    #[must_use]
    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.goal = goal;
        self
    }

    /// Replace the port allocation.
    #[must_use]
    pub fn with_ports(mut self, ports: BTreeMap<String, u16>) -> Self {
        self.ports = ports;
        self
    }
}
