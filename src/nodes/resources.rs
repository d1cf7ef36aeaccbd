// CPU accounting for pods and nodes, in milli-cores.
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use tracing::warn;

const CPU: &str = "cpu";

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(char, i32); 9] = [
    ('n', -9),
    ('u', -6),
    ('m', -3),
    ('k', 3),
    ('M', 6),
    ('G', 9),
    ('T', 12),
    ('P', 15),
    ('E', 18),
];

/// Converts a CPU quantity to milli-cores, rounding fractions of a
/// milli-core up. Returns `None` if the quantity is not a valid number.
pub fn cpu_millis(quantity: &Quantity) -> Option<i64> {
    let raw = quantity.0.trim();
    let (negative, unsigned) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };

    let (number, multiplier, suffix_exponent) = split_suffix(unsigned)?;
    let (mantissa, fraction_exponent) = parse_decimal(number)?;

    let value = mantissa.checked_mul(multiplier)?;
    let exponent = suffix_exponent + fraction_exponent + 3;
    let millis = if exponent >= 0 {
        value.checked_mul(10u128.checked_pow(exponent.unsigned_abs())?)?
    } else {
        let divisor = 10u128.checked_pow(exponent.unsigned_abs())?;
        if negative {
            value / divisor
        } else {
            value.div_ceil(divisor)
        }
    };

    let millis = i64::try_from(millis).ok()?;
    Some(if negative { -millis } else { millis })
}

// Splits "1.5Gi" / "250m" / "1e3" into the number, a binary multiplier and a
// power of ten.
fn split_suffix(raw: &str) -> Option<(&str, u128, i32)> {
    for (suffix, power) in BINARY_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return Some((number, 1024u128.pow(power), 0));
        }
    }

    let last = raw.chars().last()?;
    if let Some((_, exponent)) = DECIMAL_SUFFIXES.iter().find(|(c, _)| *c == last) {
        return Some((&raw[..raw.len() - last.len_utf8()], 1, *exponent));
    }

    match raw.find(['e', 'E']) {
        Some(idx) => {
            let exponent = raw[idx + 1..].parse::<i32>().ok()?;
            Some((&raw[..idx], 1, exponent))
        }
        None => Some((raw, 1, 0)),
    }
}

// Parses "12.345" into (12345, -3).
fn parse_decimal(number: &str) -> Option<(u128, i32)> {
    let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{}{}", int_part, frac_part);
    let mantissa = digits.parse::<u128>().ok()?;
    let exponent = -i32::try_from(frac_part.len()).ok()?;
    Some((mantissa, exponent))
}

fn quantity_millis(quantity: &Quantity, owner: &str) -> i64 {
    cpu_millis(quantity).unwrap_or_else(|| {
        warn!(owner, quantity = %quantity.0, "ignoring unparsable CPU quantity");
        0
    })
}

/// Sum of the CPU requests (not limits) of every container in the pod.
/// Containers without a CPU request count as zero.
pub fn pod_cpu(pod: &Pod) -> i64 {
    let Some(spec) = pod.spec.as_ref() else {
        return 0;
    };
    let owner = pod.metadata.name.as_deref().unwrap_or_default();

    spec.containers
        .iter()
        .filter_map(|container| container.resources.as_ref()?.requests.as_ref()?.get(CPU))
        .map(|cpu| quantity_millis(cpu, owner))
        .fold(0i64, i64::saturating_add)
}

/// Total CPU requested by a set of pods. Sums saturate at `i64::MAX`.
pub fn node_cpu<'a, I>(pods: I) -> i64
where
    I: IntoIterator<Item = &'a Pod>,
{
    pods.into_iter().map(pod_cpu).fold(0i64, i64::saturating_add)
}

/// Allocatable CPU reported in the node status, zero if not reported.
pub fn allocatable_cpu(node: &Node) -> i64 {
    let owner = node.metadata.name.as_deref().unwrap_or_default();
    node.status
        .as_ref()
        .and_then(|status| status.allocatable.as_ref())
        .and_then(|allocatable| allocatable.get(CPU))
        .map(|cpu| quantity_millis(cpu, owner))
        .unwrap_or(0)
}

/// Allocatable CPU minus what the pods request. Negative when overcommitted.
pub fn free_cpu<'a, I>(node: &Node, pods: I) -> i64
where
    I: IntoIterator<Item = &'a Pod>,
{
    allocatable_cpu(node).saturating_sub(node_cpu(pods))
}
