pub mod calls;
pub mod catalog;
pub mod intake;
pub mod outcome;
pub mod policy;
pub mod transition;

pub use calls::CallEventService;
pub use catalog::StageCatalog;
pub use intake::LeadIntakeService;
pub use transition::LeadStageService;
