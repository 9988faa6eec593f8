//! Tool-orchestration shell core: the pipeline engine, its remote and
//! sandboxed execution backends, and the registry/discovery layer that
//! resolves where remote tool calls go.

pub mod discovery;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod sandbox;
pub mod session;

pub use error::{PipelineError, ShellError, ToolDispatchError};
pub use pipeline::{Engine, Stage};
pub use registry::{RegistryClient, Workload};
pub use session::RemoteSession;
