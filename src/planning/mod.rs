//! Planning inputs consumed by the core: task definitions and the upstream
//! capability/physical maps.

pub mod definition;
pub mod maps;

pub use definition::{
    AcceptanceCriterion, FileMapping, SpecRef, StateMachineCoverage, TaskContext, TaskDefinition,
    definition_path, load_definition, load_definitions,
};
pub use maps::{BehaviorFiles, Capability, CapabilityBehavior, CapabilityMap, Domain, PhysicalMap};
