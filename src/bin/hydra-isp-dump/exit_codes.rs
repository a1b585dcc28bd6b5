pub const EXIT_OK: i32 = 0;
pub const EXIT_INVALID_CONFIG: i32 = 2;
pub const EXIT_CONNECTION: i32 = 10;
pub const EXIT_PROTOCOL: i32 = 11;
pub const EXIT_IDENTITY: i32 = 12;
pub const EXIT_OUTPUT: i32 = 13;
pub const EXIT_UNEXPECTED: i32 = 20;
