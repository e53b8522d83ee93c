//! I/O layer - protocol-agnostic process and transport abstractions
//!
//! - **Transport**: bidirectional text exchange over any byte stream
//! - **Process**: backend process lifecycle with stdio hand-off

pub mod process;
pub mod transport;

pub use process::{
    ChildProcessManager, ProcessDescriptor, ProcessError, ProcessExitEvent, ProcessExitHandler,
    ProcessManager, ProcessState, StderrMonitor, StopMode,
};
pub use transport::{MockTransport, StreamTransport, StreamTransportError, Transport};
