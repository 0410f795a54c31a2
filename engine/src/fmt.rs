//! Expands a hash-referenced log template against a packed 32-bit argument
//! vector (§4.3, C3). A hand-rolled scanner over the conversion grammar
//! `(%[-+0 #]{0,5}(\d+|\*)?(\.(\d+|\*))?(h|l|ll|w|I|I32|I64)?[duxXp])|%%`
//! (DD-2: no fresh `regex` dependency for a state machine this small).

/// Widens an argument to a signed 32-bit interpretation the way the
/// reference `_snprintf` does: values above 2^31 are treated as negative.
/// Note this is *not* symmetric around `i32::MIN` — it is a literal port of
/// the reference's `if v > 2147483648: -(4294967296 - v)`, so exactly
/// `2147483648` (2^31) itself is left positive.
fn widen_signed(v: u32) -> i64 {
    let v = v as i64;
    if v > 2_147_483_648 {
        -(4_294_967_296 - v)
    } else {
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conv {
    Decimal,
    Unsigned,
    LowerHex,
    UpperHex,
    Pointer,
}

#[derive(Debug, Clone, Copy, Default)]
struct Flags {
    left: bool,
    plus: bool,
    space: bool,
    zero: bool,
    alt: bool,
}

struct Spec {
    flags: Flags,
    width: Option<usize>,
    precision: Option<usize>,
    conv: Conv,
}

/// Scans one `%`-conversion starting at `chars[pos]` (which must be `%`).
/// Returns `(spec_or_none_for_literal_percent, chars_consumed)`, or `None`
/// if the text at `pos` isn't a conversion this grammar recognizes (in
/// which case the caller should emit the literal `%` and advance by one).
fn scan_conversion(chars: &[char], pos: usize) -> Option<(Option<Spec>, usize)> {
    let mut i = pos + 1; // skip '%'
    if chars.get(i) == Some(&'%') {
        return Some((None, i + 1 - pos));
    }

    let mut flags = Flags::default();
    let mut flag_count = 0;
    while flag_count < 5 {
        match chars.get(i) {
            Some('-') => flags.left = true,
            Some('+') => flags.plus = true,
            Some(' ') => flags.space = true,
            Some('0') => flags.zero = true,
            Some('#') => flags.alt = true,
            _ => break,
        }
        i += 1;
        flag_count += 1;
    }

    let width = if chars.get(i) == Some(&'*') {
        i += 1;
        Some(usize::MAX) // "take next arg as width" -- not modeled, treated as no-op width
    } else {
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            chars[start..i]
                .iter()
                .collect::<String>()
                .parse::<usize>()
                .ok()
        } else {
            None
        }
    };

    let precision = if chars.get(i) == Some(&'.') {
        i += 1;
        if chars.get(i) == Some(&'*') {
            i += 1;
            Some(0)
        } else {
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            Some(
                chars[start..i]
                    .iter()
                    .collect::<String>()
                    .parse::<usize>()
                    .unwrap_or(0),
            )
        }
    } else {
        None
    };

    // length modifiers: h | l | ll | w | I | I32 | I64 -- consumed, no semantic effect
    for modifier in ["I64", "I32", "ll", "I", "h", "l", "w"] {
        let mod_chars: Vec<char> = modifier.chars().collect();
        if chars[i..].starts_with(mod_chars.as_slice()) {
            i += mod_chars.len();
            break;
        }
    }

    let conv = match chars.get(i) {
        Some('d') => Conv::Decimal,
        Some('u') => Conv::Unsigned,
        Some('x') => Conv::LowerHex,
        Some('X') => Conv::UpperHex,
        Some('p') => Conv::Pointer,
        _ => return None,
    };
    i += 1;

    Some((
        Some(Spec {
            flags,
            width: width.filter(|w| *w != usize::MAX),
            precision,
            conv,
        }),
        i - pos,
    ))
}

fn render_one(spec: &Spec, arg: u32) -> String {
    let (mut digits, negative) = match spec.conv {
        Conv::Decimal => {
            let signed = widen_signed(arg);
            (signed.unsigned_abs().to_string(), signed < 0)
        }
        Conv::Unsigned => (arg.to_string(), false),
        Conv::LowerHex => (format!("{arg:x}"), false),
        Conv::UpperHex => (format!("{arg:X}"), false),
        Conv::Pointer => (format!("{arg:x}"), false),
    };

    if let Some(prec) = spec.precision {
        if digits == "0" && prec == 0 {
            digits.clear();
        } else if digits.len() < prec {
            digits = "0".repeat(prec - digits.len()) + &digits;
        }
    }

    if spec.flags.alt && matches!(spec.conv, Conv::LowerHex) && arg != 0 {
        digits = format!("0x{digits}");
    } else if spec.flags.alt && matches!(spec.conv, Conv::UpperHex) && arg != 0 {
        digits = format!("0X{digits}");
    }

    let sign = if negative {
        "-"
    } else if spec.flags.plus && matches!(spec.conv, Conv::Decimal) {
        "+"
    } else if spec.flags.space && matches!(spec.conv, Conv::Decimal) {
        " "
    } else {
        ""
    };

    let body = format!("{sign}{digits}");
    match spec.width {
        Some(w) if body.len() < w => {
            let pad = w - body.len();
            if spec.flags.left {
                format!("{body}{}", " ".repeat(pad))
            } else if spec.flags.zero && spec.precision.is_none() {
                format!("{sign}{}{digits}", "0".repeat(pad))
            } else {
                format!("{}{body}", " ".repeat(pad))
            }
        }
        _ => body,
    }
}

/// Counts how many conversions (excluding `%%`) the template contains,
/// without doing any rendering. Used to decide whether the argument vector
/// is long enough before committing to formatting.
fn count_conversions(template: &str) -> usize {
    let chars: Vec<char> = template.chars().collect();
    let mut i = 0;
    let mut count = 0;
    while i < chars.len() {
        if chars[i] == '%' {
            match scan_conversion(&chars, i) {
                Some((Some(_), len)) => {
                    count += 1;
                    i += len;
                }
                Some((None, len)) => i += len,
                None => i += 1,
            }
        } else {
            i += 1;
        }
    }
    count
}

/// Formats `args` (hex) for the "template followed by args" fallback path
/// used both when the argument vector is too short and when rendering
/// would otherwise fail.
fn hex_args(args: &[u32]) -> String {
    args.iter()
        .map(|a| format!("0x{a:x}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Expands `template` against `args`. A template with no recognized
/// conversion is returned unchanged (idempotence, §8). If `args` has fewer
/// entries than the template has conversions, the template is returned
/// unchanged. Formatting never panics; on any internal inconsistency the
/// fallback `template, args=<hex args>` form is returned instead.
pub fn format_template(template: &str, args: &[u32]) -> String {
    let needed = count_conversions(template);
    if needed > args.len() {
        return template.to_string();
    }
    if needed == 0 {
        return template.to_string();
    }

    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    let mut arg_idx = 0;
    while i < chars.len() {
        if chars[i] == '%' {
            match scan_conversion(&chars, i) {
                Some((Some(spec), len)) => {
                    let Some(&arg) = args.get(arg_idx) else {
                        return format!("{template}, args={}", hex_args(args));
                    };
                    out.push_str(&render_one(&spec, arg));
                    arg_idx += 1;
                    i += len;
                }
                Some((None, len)) => {
                    out.push('%');
                    i += len;
                }
                None => {
                    out.push(chars[i]);
                    i += 1;
                }
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_on_plain_text() {
        assert_eq!(format_template("no conversions here", &[]), "no conversions here");
    }

    #[test]
    fn basic_decimal_and_hex() {
        assert_eq!(format_template("value=%d hex=%x", &[15, 255]), "value=15 hex=ff");
        assert_eq!(format_template("%X", &[255]), "FF");
    }

    #[test]
    fn pointer_is_lowercase_no_prefix() {
        assert_eq!(format_template("%p", &[0xabcd]), "abcd");
    }

    #[test]
    fn percent_percent_literal() {
        assert_eq!(format_template("100%% done", &[]), "100% done");
    }

    #[test]
    fn signed_reinterpretation_above_2_31() {
        // 4294967295 == u32::MAX -> signed -1
        assert_eq!(format_template("%d", &[4_294_967_295]), "-1");
        // exactly 2^31 is NOT reinterpreted per the reference's strict '>' check
        assert_eq!(format_template("%d", &[2_147_483_648]), "2147483648");
    }

    #[test]
    fn width_and_zero_padding() {
        assert_eq!(format_template("%05d", &[42]), "00042");
        assert_eq!(format_template("%-5d|", &[42]), "42   |");
    }

    #[test]
    fn too_few_args_returns_template_unchanged() {
        assert_eq!(format_template("%d %d", &[1]), "%d %d");
    }
}
