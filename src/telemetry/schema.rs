//! # Telemetry Schema
//!
//! The fixed 25-column downlink record. Field order here is the wire order,
//! the CSV column order and the iteration order of [`Field::ALL`].
//!
//! Every value is kept as the string received from the link. Numeric
//! interpretation is left to consumers through [`TelemetryRecord::number`],
//! which maps unparsable input to `0.0` instead of failing.

use std::fmt;

/// Number of fields in a telemetry frame
pub const FIELD_COUNT: usize = 25;

macro_rules! telemetry_schema {
    ($( $variant:ident => $field:ident : $name:literal ),+ $(,)?) => {
        /// Named column of the telemetry schema
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Field {
            $( $variant ),+
        }

        impl Field {
            /// All fields in wire order
            pub const ALL: [Field; FIELD_COUNT] = [ $( Field::$variant ),+ ];

            /// Column header name (e.g. `PACKET_COUNT`)
            pub fn name(self) -> &'static str {
                match self {
                    $( Field::$variant => $name ),+
                }
            }
        }

        /// One decoded telemetry frame
        ///
        /// Built once per frame and never mutated afterwards; share it as
        /// `Arc<TelemetryRecord>`.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct TelemetryRecord {
            $( $field: String ),+
        }

        impl TelemetryRecord {
            /// Value of a field as received
            pub fn get(&self, field: Field) -> &str {
                match field {
                    $( Field::$variant => &self.$field ),+
                }
            }

            $(
                #[doc = concat!("`", $name, "` as received")]
                pub fn $field(&self) -> &str {
                    &self.$field
                }
            )+

            /// Build a record from exactly one value per field, in schema order
            pub fn from_array(values: [String; FIELD_COUNT]) -> Self {
                let [ $( $field ),+ ] = values;
                Self { $( $field ),+ }
            }

            /// Fill the schema positionally; `None` if fewer than [`FIELD_COUNT`] values
            fn from_ordered<I>(mut values: I) -> Option<Self>
            where
                I: Iterator<Item = String>,
            {
                Some(Self {
                    $( $field: values.next()? ),+
                })
            }
        }
    };
}

telemetry_schema! {
    TeamId => team_id: "TEAM_ID",
    MissionTime => mission_time: "MISSION_TIME",
    PacketCount => packet_count_raw: "PACKET_COUNT",
    Mode => mode: "MODE",
    State => state: "STATE",
    Altitude => altitude: "ALTITUDE",
    Temperature => temperature: "TEMPERATURE",
    Pressure => pressure: "PRESSURE",
    Voltage => voltage: "VOLTAGE",
    GyroR => gyro_r: "GYRO_R",
    GyroP => gyro_p: "GYRO_P",
    GyroY => gyro_y: "GYRO_Y",
    AccelR => accel_r: "ACCEL_R",
    AccelP => accel_p: "ACCEL_P",
    AccelY => accel_y: "ACCEL_Y",
    MagR => mag_r: "MAG_R",
    MagP => mag_p: "MAG_P",
    MagY => mag_y: "MAG_Y",
    AutoGyroRotationRate => auto_gyro_rotation_rate: "AUTO_GYRO_ROTATION_RATE",
    GpsTime => gps_time: "GPS_TIME",
    GpsAltitude => gps_altitude: "GPS_ALTITUDE",
    GpsLatitude => gps_latitude: "GPS_LATITUDE",
    GpsLongitude => gps_longitude: "GPS_LONGITUDE",
    GpsSats => gps_sats: "GPS_SATS",
    CmdEcho => cmd_echo: "CMD_ECHO",
}

impl TelemetryRecord {
    /// Build a record from at least [`FIELD_COUNT`] values in schema order
    ///
    /// Values beyond the schema are dropped. Returns `None` when too few
    /// values are supplied.
    pub fn from_values<I, S>(values: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_ordered(values.into_iter().map(Into::into))
    }

    /// Column names in schema order
    pub fn header() -> impl Iterator<Item = &'static str> {
        Field::ALL.iter().map(|f| f.name())
    }

    /// Field values in schema order
    pub fn values(&self) -> impl Iterator<Item = &str> + '_ {
        Field::ALL.iter().map(move |&f| self.get(f))
    }

    /// Numeric value of a field; unparsable input reads as `0.0`
    pub fn number(&self, field: Field) -> f64 {
        self.get(field).trim().parse::<f64>().unwrap_or(0.0)
    }

    /// Remote packet counter, or `None` if the field is not an integer
    pub fn packet_count(&self) -> Option<i64> {
        self.packet_count_raw.trim().parse::<i64>().ok()
    }

    /// Render back to a comma-joined frame (without line terminator)
    pub fn to_line(&self) -> String {
        self.values().collect::<Vec<_>>().join(",")
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}
