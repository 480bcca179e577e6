//! Reserved codes shared by the accident data providers.

/// CBS accident file, type 1 (accidents with casualties).
pub const CBS_ACCIDENT_TYPE_1_CODE: i32 = 1;
/// Citizen reports forwarded by United Hatzala.
pub const UNITED_HATZALA_CODE: i32 = 2;
/// CBS accident file, type 3.
pub const CBS_ACCIDENT_TYPE_3_CODE: i32 = 3;
/// Road Safety Authority camera reports, served as the alternate marker set.
pub const RSA_PROVIDER_CODE: i32 = 4;

/// `acctype` pseudo-code matching any accident with a bicycle involved.
pub const BIKE_ACCIDENTS: i32 = 21;
/// Highest `acctype` that maps directly onto the `accident_type` column.
pub const MAX_DIRECT_ACCIDENT_TYPE: i32 = 20;
/// CBS vehicle type code for bicycles.
pub const VEHICLE_TYPE_BIKE: i32 = 15;

/// `location_accuracy` value for markers geocoded to an exact point.
pub const LOCATION_ACCURACY_EXACT: i32 = 1;

pub const SEVERITY_FATAL: i32 = 1;
pub const SEVERITY_SEVERE: i32 = 2;
pub const SEVERITY_LIGHT: i32 = 3;

/// Daylight hours are `[DAYLIGHT_START_HOUR, DAYLIGHT_END_HOUR)`.
pub const DAYLIGHT_START_HOUR: i32 = 6;
pub const DAYLIGHT_END_HOUR: i32 = 18;
/// Width of an arbitrary `show_time` window, in hours.
pub const TIME_WINDOW_HOURS: i32 = 6;

/// Value written for numeric CSV cells that are empty.
pub const MISSING_NUMERIC: i64 = -1;
