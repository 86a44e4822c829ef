//! Ports: interfaces the application layer drives infrastructure through

mod mock_spawner;
mod resource_reader;
mod spawner;

pub use mock_spawner::{MockSpawner, NullSink};
pub use resource_reader::{ResourceReader, StaticResourceReader};
pub use spawner::{
    forward_lines, ExitStatus, OutputSink, OutputStream, ProcessSpawner, SpawnSpec, SpawnedChild,
};
