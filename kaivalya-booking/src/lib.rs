pub mod draft;
pub mod purchase;
pub mod schedule;
pub mod session;
pub mod wizard;

pub use draft::BookingDraft;
pub use purchase::Purchase;
pub use session::{CheckoutSession, SessionHandle};
pub use wizard::{
    Banner, BookingObserver, BookingSnapshot, BookingWizard, ValidationError, WizardError, WizardSettings, WizardStep,
};
