pub mod doctor;
pub mod availability;
pub mod eta;

pub use doctor::DoctorService;
pub use availability::{compute_slots, slots_for_date, Slots};
pub use eta::{estimate_arrival, format_display_time, ArrivalEstimate, EtaEstimate};
