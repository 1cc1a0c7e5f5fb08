pub mod booking;
pub mod lifecycle;
pub mod notify;

pub use booking::AppointmentService;
pub use lifecycle::AppointmentLifecycle;
pub use notify::NotificationService;
