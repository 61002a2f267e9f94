#![deny(missing_docs)]
#![doc = "Parameter grid enumeration, stage definitions and task synthesis."]

/// Parameter axes and grid definitions.
pub mod axis;
/// Grid enumeration and working directory provisioning.
pub mod generate;
/// Grid point identity.
pub mod point;
/// Pipeline stages and their execution table.
pub mod stage;
/// Task synthesis.
pub mod task;

pub use axis::{AxisValue, GridSpec, ParameterAxis};
pub use generate::{generate, load_grid, provision, GridManifest, LoadedGrid, ProvisionReport};
pub use point::{point_id, AxisAssignment, GridPoint};
pub use stage::{ShardSpec, Stage, StageArgument, StageSpec, StageTable};
pub use task::{shard_output_name, synthesize, FixedShards, SampleListShards, ShardSource, Task};
