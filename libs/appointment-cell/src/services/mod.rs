pub mod availability;
pub mod booking;
pub mod calendar;
pub mod slot_rules;

pub use availability::AvailabilityService;
pub use booking::{AppointmentBookingService, BookingOrigin};
pub use calendar::{CalendarExporter, DisabledCalendarExporter, HttpCalendarExporter};
