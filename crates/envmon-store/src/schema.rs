//! CSV record layout of partition files.

use envmon_types::{ParseError, ParseResult, SensorReading};

/// Column names, written once at the top of each partition.
pub const HEADER: [&str; 11] = [
    "timestamp",
    "temperature",
    "humidity",
    "pressure",
    "co2_equivalent",
    "iaq",
    "voc_equivalent",
    "gas_resistance",
    "stabilized",
    "runin_status",
    "device_id",
];

/// Render a reading as one CSV record.
///
/// Floats carry two decimals, `stabilized` is `0`/`1`.
pub fn to_record(reading: &SensorReading) -> [String; 11] {
    [
        reading.timestamp.to_string(),
        format!("{:.2}", reading.temperature),
        format!("{:.2}", reading.humidity),
        format!("{:.2}", reading.pressure),
        format!("{:.2}", reading.co2_equivalent),
        format!("{:.2}", reading.iaq),
        format!("{:.2}", reading.voc_equivalent),
        format!("{:.2}", reading.gas_resistance),
        if reading.stabilized { "1" } else { "0" }.to_string(),
        format!("{:.2}", reading.runin_status),
        reading.device_id.clone(),
    ]
}

fn parse_f32(field: &'static str, value: &str) -> ParseResult<f32> {
    value
        .trim()
        .parse()
        .map_err(|_| ParseError::invalid_field(field, value))
}

/// Parse one CSV record back into a reading.
///
/// The `has_*` flags are not stored; they are restored from non-zero values.
pub fn from_record(record: &csv::StringRecord) -> ParseResult<SensorReading> {
    if record.len() != HEADER.len() {
        return Err(ParseError::FieldCount {
            expected: HEADER.len(),
            actual: record.len(),
        });
    }

    let timestamp = record[0]
        .trim()
        .parse()
        .map_err(|_| ParseError::invalid_field("timestamp", &record[0]))?;
    let stabilized = match record[8].trim() {
        "1" => true,
        "0" => false,
        other => return Err(ParseError::invalid_field("stabilized", other)),
    };

    let mut reading = SensorReading {
        timestamp,
        temperature: parse_f32("temperature", &record[1])?,
        humidity: parse_f32("humidity", &record[2])?,
        pressure: parse_f32("pressure", &record[3])?,
        co2_equivalent: parse_f32("co2_equivalent", &record[4])?,
        iaq: parse_f32("iaq", &record[5])?,
        voc_equivalent: parse_f32("voc_equivalent", &record[6])?,
        gas_resistance: parse_f32("gas_resistance", &record[7])?,
        stabilized,
        ..SensorReading::new(&record[10])
    };
    reading.set_runin_status(parse_f32("runin_status", &record[9])?);
    reading.has_co2_data = reading.co2_equivalent != 0.0;
    reading.has_iaq_data = reading.iaq != 0.0;
    reading.has_voc_data = reading.voc_equivalent != 0.0;

    Ok(reading)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SensorReading {
        let mut reading = SensorReading::new("M5Stack_001");
        reading.timestamp = 1_710_504_000;
        reading.temperature = 23.456;
        reading.humidity = 41.0;
        reading.pressure = 1013.25;
        reading.co2_equivalent = 612.3;
        reading.has_co2_data = true;
        reading.gas_resistance = 48_250.5;
        reading.stabilized = true;
        reading.set_runin_status(80.0);
        reading
    }

    #[test]
    fn test_record_formatting() {
        let record = to_record(&sample());
        assert_eq!(record[0], "1710504000");
        assert_eq!(record[1], "23.46");
        assert_eq!(record[4], "612.30");
        assert_eq!(record[5], "0.00");
        assert_eq!(record[8], "1");
        assert_eq!(record[10], "M5Stack_001");
    }

    #[test]
    fn test_record_parses_back() {
        let record = csv::StringRecord::from(to_record(&sample()).to_vec());
        let reading = from_record(&record).unwrap();
        assert_eq!(reading.timestamp, 1_710_504_000);
        assert!((reading.temperature - 23.46).abs() < 0.001);
        assert!(reading.has_co2_data);
        assert!(!reading.has_iaq_data);
        assert!(reading.is_calibrated);
        assert!(reading.stabilized);
        assert_eq!(reading.device_id, "M5Stack_001");
    }

    #[test]
    fn test_record_field_count_checked() {
        let record = csv::StringRecord::from(vec!["1", "2"]);
        assert!(matches!(
            from_record(&record),
            Err(ParseError::FieldCount {
                expected: 11,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_record_rejects_bad_stabilized() {
        let mut fields = to_record(&sample()).to_vec();
        fields[8] = "yes".to_string();
        let record = csv::StringRecord::from(fields);
        assert!(matches!(
            from_record(&record),
            Err(ParseError::InvalidField {
                field: "stabilized",
                ..
            })
        ));
    }
}
