//! modelhub operator: CRD installation and controller wiring

#![deny(missing_docs)]

/// Controller construction for the four reconciled kinds
pub mod controller_runner;
/// CRD manifest rendering and installation
pub mod crds;
