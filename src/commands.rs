pub mod evaluate;
pub mod launch;
pub mod manifests;
pub mod provision;
pub mod status;
pub mod sweep;
