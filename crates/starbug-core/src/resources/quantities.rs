use crate::error::{CoreError, Result};

/// Resource kind name for CPU (stored in millicores)
pub const CPU: &str = "cpu";
/// Resource kind name for memory (stored in bytes)
pub const MEMORY: &str = "memory";
/// Resource kind name for local ephemeral storage (stored in bytes)
pub const EPHEMERAL_STORAGE: &str = "ephemeral-storage";

const KIB: i64 = 1024;
const MIB: i64 = 1024 * KIB;
const GIB: i64 = 1024 * MIB;
const TIB: i64 = 1024 * GIB;

/// Whether a resource kind is counted in bytes rather than milli-units
pub fn is_byte_quantity(name: &str) -> bool {
    name == MEMORY || name == EPHEMERAL_STORAGE || name.starts_with("hugepages-")
}

/// Parse CPU string (e.g., "2", "1000m", "0.5") into millicores
pub fn parse_cpu(s: &str) -> std::result::Result<i64, String> {
    if let Some(m) = s.strip_suffix('m') {
        // Millicores
        m.parse::<i64>()
            .map_err(|e| format!("Invalid CPU millicore value: {}", e))
    } else if let Ok(cores) = s.parse::<f64>() {
        // Cores as float
        Ok((cores * 1000.0).round() as i64)
    } else {
        Err(format!("Invalid CPU format: {}", s))
    }
}

/// Parse memory string (e.g., "128Mi", "1Gi", "1G", "1024") into bytes
pub fn parse_memory(s: &str) -> std::result::Result<i64, String> {
    let binary = [("Ki", KIB), ("Mi", MIB), ("Gi", GIB), ("Ti", TIB)];
    for (suffix, factor) in binary {
        if let Some(num) = s.strip_suffix(suffix) {
            return Ok(num.parse::<i64>().map_err(|e| e.to_string())? * factor);
        }
    }

    let decimal = [("k", 1_000), ("M", 1_000_000), ("G", 1_000_000_000)];
    for (suffix, factor) in decimal {
        if let Some(num) = s.strip_suffix(suffix) {
            return Ok(num.parse::<i64>().map_err(|e| e.to_string())? * factor);
        }
    }

    // Plain bytes
    s.parse::<i64>().map_err(|e| e.to_string())
}

/// Parse a quantity for the named resource kind into its base unit
///
/// Byte-counted kinds (memory, storage, hugepages) parse to bytes; every
/// other kind parses to milli-units, so `"2"` GPUs is stored as 2000.
pub fn parse_quantity(name: &str, value: &str) -> Result<i64> {
    let parsed = if is_byte_quantity(name) {
        parse_memory(value)
    } else {
        parse_cpu(value)
    };

    match parsed {
        Ok(v) if v < 0 => Err(CoreError::invalid_quantity(
            name,
            value,
            "quantities must not be negative",
        )),
        Ok(v) => Ok(v),
        Err(reason) => Err(CoreError::invalid_quantity(name, value, reason)),
    }
}

/// Format a base-unit quantity back into Kubernetes quantity syntax
///
/// Picks the largest clean binary unit for byte quantities; milli-unit
/// quantities print as whole units when they divide evenly.
pub fn format_quantity(name: &str, value: i64) -> String {
    if is_byte_quantity(name) {
        if value > 0 && value % GIB == 0 {
            format!("{}Gi", value / GIB)
        } else if value > 0 && value % MIB == 0 {
            format!("{}Mi", value / MIB)
        } else if value > 0 && value % KIB == 0 {
            format!("{}Ki", value / KIB)
        } else {
            format!("{}", value)
        }
    } else if value % 1000 == 0 {
        format!("{}", value / 1000)
    } else {
        format!("{}m", value)
    }
}
