//! Serde adapter writing `f64` as its shortest round-tripping decimal text.
//!
//! JSON has no NaN or infinities, and fitness values use both. Use with
//! `#[serde(with = "crate::checkpoint::exact_f64")]`.

use serde::{Deserialize, Deserializer, Serializer, de::Error};

pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let text = String::deserialize(deserializer)?;
    text.parse()
        .map_err(|_| D::Error::custom(format!("{:?} is not a number", text)))
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper(#[serde(with = "super")] f64);

    #[test]
    fn test_exact_text() {
        for value in [0.1, -1.0 / 3.0, 1e300, f64::MIN_POSITIVE, f64::INFINITY, f64::NEG_INFINITY] {
            let json = serde_json::to_string(&Wrapper(value)).unwrap();
            let back: Wrapper = serde_json::from_str(&json).unwrap();
            assert_eq!(back.0.to_bits(), value.to_bits());
        }
        let nan: Wrapper = serde_json::from_str("\"NaN\"").unwrap();
        assert!(nan.0.is_nan());
        assert!(serde_json::from_str::<Wrapper>("\"fast\"").is_err());
    }
}
