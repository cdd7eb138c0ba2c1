//! After-sales endpoints: returns, complaints, notifications and seller
//! onboarding.

pub(super) mod complaints;
pub(super) mod notifications;
pub(super) mod returns;
pub(super) mod sellers;
