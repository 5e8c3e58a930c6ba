use std::io::Write;

use serde::Serialize;

pub(crate) fn write_json<T: Serialize + ?Sized>(
    stdout: &mut dyn Write,
    value: &T,
) -> Result<(), String> {
    serde_json::to_writer_pretty(&mut *stdout, value).map_err(|err| err.to_string())?;
    writeln!(stdout).map_err(|err| err.to_string())?;
    Ok(())
}

pub(crate) fn or_dash(value: Option<&str>) -> &str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => "-",
    }
}

pub(crate) fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_output_ends_with_newline() {
        let mut out = Vec::new();
        if let Err(err) = write_json(&mut out, &serde_json::json!({ "ok": true })) {
            panic!("write_json: {err}");
        }
        let text = String::from_utf8_lossy(&out);
        assert!(text.ends_with("}\n"));
        assert_eq!(or_dash(Some("")), "-");
        assert_eq!(or_dash(Some("1.0")), "1.0");
    }
}
