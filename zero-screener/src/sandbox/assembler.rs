//! Script assembler.
//!
//! Produces one self-contained Python program: a prelude that disables
//! network data libraries, the user's code verbatim, the market data as a
//! single embedded JSON document, and a harness that calls the entry
//! function and prints its result between the run's markers.

use super::markers::Markers;
use crate::data::DataSet;
use crate::error::ScreenerError;

/// Names of entry-function locals the harness salvages after an exception.
pub const PARTIAL_RESULT_NAMES: &[&str] = &["matches", "results", "selected", "passed", "hits"];

/// Preferred entry function name.
pub const ENTRY_FUNCTION: &str = "screen_stocks";

const PRELUDE: &str = r#"# -*- coding: utf-8 -*-
import inspect
import json
import math
import sys
import traceback
import types

try:
    import pandas as pd
except Exception as _zs_exc:
    pd = None
    print(f"[zero-screener] pandas unavailable: {_zs_exc}", file=sys.stderr)

try:
    import numpy as np
except Exception as _zs_exc:
    np = None
    print(f"[zero-screener] numpy unavailable: {_zs_exc}", file=sys.stderr)


def _zs_blocked(name):
    def _blocked(*args, **kwargs):
        print(
            f"[zero-screener] {name} is disabled in screeners; use the data argument instead",
            file=sys.stderr,
        )
        return pd.DataFrame() if pd is not None else None
    return _blocked


class _ZsTicker:
    def __init__(self, symbol=None, *args, **kwargs):
        self.ticker = symbol
        self.info = {}

    def history(self, *args, **kwargs):
        return _zs_blocked("yfinance.Ticker.history")()


_zs_yf = types.ModuleType("yfinance")
_zs_yf.download = _zs_blocked("yfinance.download")
_zs_yf.Ticker = _ZsTicker
_zs_yf.Tickers = lambda *args, **kwargs: types.SimpleNamespace(tickers={})
sys.modules["yfinance"] = _zs_yf

_zs_pdr = types.ModuleType("pandas_datareader")
_zs_pdr_data = types.ModuleType("pandas_datareader.data")
_zs_pdr_data.DataReader = _zs_blocked("pandas_datareader.DataReader")
_zs_pdr_data.get_data_yahoo = _zs_blocked("pandas_datareader.get_data_yahoo")
_zs_pdr.data = _zs_pdr_data
_zs_pdr.DataReader = _zs_pdr_data.DataReader
sys.modules["pandas_datareader"] = _zs_pdr
sys.modules["pandas_datareader.data"] = _zs_pdr_data

# ---- user code ----
"#;

const HARNESS: &str = r#"
# ---- end user code ----

_ZS_DATA = json.loads(__ZS_DATA__)
_ZS_BEGIN = "__ZS_BEGIN__"
_ZS_END = "__ZS_END__"
_ZS_PARTIAL_NAMES = (__ZS_PARTIAL_NAMES__)


def _zs_find_entry():
    scope = globals()
    fn = scope.get("__ZS_ENTRY__")
    if callable(fn):
        return fn
    for name in sorted(scope):
        if name.startswith("_zs") or name.startswith("_ZS"):
            continue
        obj = scope[name]
        if "screen" in name.lower() and callable(obj) and not isinstance(obj, type):
            return obj
    return None


def _zs_text(value):
    return value if isinstance(value, str) else str(value)


def _zs_clean(value):
    if value is None or isinstance(value, (bool, int, str)):
        return value
    if isinstance(value, float):
        return value if math.isfinite(value) else None
    if isinstance(value, dict):
        return {_zs_text(k): _zs_clean(v) for k, v in value.items()}
    if isinstance(value, (list, tuple, set)):
        return [_zs_clean(v) for v in value]
    if hasattr(value, "item"):
        try:
            return _zs_clean(value.item())
        except Exception:
            pass
    if hasattr(value, "tolist"):
        try:
            return _zs_clean(value.tolist())
        except Exception:
            pass
    if hasattr(value, "isoformat"):
        return value.isoformat()
    return _zs_text(value)


def _zs_coerce(value):
    if isinstance(value, dict):
        matches = value.get("matches", [])
        if isinstance(matches, (list, tuple)):
            matches = [_zs_text(m) for m in matches]
        else:
            matches = []
        details = value.get("details", {})
        if not isinstance(details, dict):
            details = {}
        result = {"matches": matches, "details": details}
        if value.get("error") is not None:
            result["error"] = _zs_text(value["error"])
        elif value.get("success") is False:
            result["error"] = "Screener reported failure"
        return result
    if isinstance(value, (list, tuple)):
        return {"matches": [_zs_text(m) for m in value], "details": {}}
    if isinstance(value, str):
        return {"matches": [], "details": {}, "error": value}
    return {"matches": [], "details": {}}


def _zs_partial(exc, entry):
    code = getattr(entry, "__code__", None)
    frame_locals = None
    tb = exc.__traceback__
    while tb is not None:
        if code is not None and tb.tb_frame.f_code is code:
            frame_locals = tb.tb_frame.f_locals
        tb = tb.tb_next
    if not frame_locals:
        return []
    for name in _ZS_PARTIAL_NAMES:
        found = frame_locals.get(name)
        if isinstance(found, (list, tuple)):
            return [_zs_text(m) for m in found]
    return []


def _zs_call(entry):
    try:
        params = inspect.signature(entry).parameters
    except (TypeError, ValueError):
        params = None
    if params is not None and len(params) == 0:
        return entry()
    return entry(_ZS_DATA)


def _zs_emit(result):
    try:
        payload = json.dumps(_zs_clean(result), allow_nan=False)
    except Exception as exc:
        payload = json.dumps({
            "matches": [_zs_text(m) for m in result.get("matches", [])],
            "details": {},
            "error": f"Result is not JSON serializable: {exc}",
        })
    sys.stdout.write("\n" + _ZS_BEGIN + "\n" + payload + "\n" + _ZS_END + "\n")
    sys.stdout.flush()


def _zs_main():
    entry = _zs_find_entry()
    if entry is None:
        _zs_emit({
            "matches": [],
            "details": {},
            "error": "No screener entry function found; define __ZS_ENTRY__(data)",
        })
        return 0
    try:
        result = _zs_coerce(_zs_call(entry))
    except Exception as exc:
        formatted = "".join(traceback.format_exception(type(exc), exc, exc.__traceback__))
        sys.stderr.write(formatted)
        result = {
            "matches": _zs_partial(exc, entry),
            "details": {},
            "error": f"{type(exc).__name__}: {exc}\n{formatted[-1500:]}",
        }
    _zs_emit(result)
    return 0


if __name__ == "__main__":
    sys.exit(_zs_main())
"#;

/// A ready-to-run program and the markers its harness prints.
#[derive(Debug, Clone)]
pub struct AssembledScript {
    pub source: String,
    pub markers: Markers,
}

/// Encode a string as a Python string literal.
///
/// A JSON string literal is also a valid Python literal: JSON escapes are
/// a subset of Python's, and non-ASCII text is emitted as UTF-8.
fn python_literal(s: &str) -> Result<String, ScreenerError> {
    serde_json::to_string(s).map_err(|e| ScreenerError::Internal(format!("encode literal: {}", e)))
}

/// Assemble a program for `user_code` over `data`, with fresh markers.
pub fn assemble(user_code: &str, data: &DataSet) -> Result<AssembledScript, ScreenerError> {
    assemble_with_markers(user_code, data, Markers::generate())
}

pub fn assemble_with_markers(
    user_code: &str,
    data: &DataSet,
    markers: Markers,
) -> Result<AssembledScript, ScreenerError> {
    let document = serde_json::to_string(data)
        .map_err(|e| ScreenerError::Internal(format!("serialize market data: {}", e)))?;

    let partial_names: String = PARTIAL_RESULT_NAMES
        .iter()
        .map(|n| format!("\"{}\", ", n))
        .collect();

    // Data goes in last so its contents are never rescanned for placeholders
    let harness = HARNESS
        .replace("__ZS_BEGIN__", markers.begin())
        .replace("__ZS_END__", markers.end())
        .replace("__ZS_ENTRY__", ENTRY_FUNCTION)
        .replace("__ZS_PARTIAL_NAMES__", partial_names.trim_end())
        .replace("__ZS_DATA__", &python_literal(&document)?);

    let mut source = String::with_capacity(PRELUDE.len() + user_code.len() + harness.len() + 1);
    source.push_str(PRELUDE);
    source.push_str(user_code);
    if !user_code.ends_with('\n') {
        source.push('\n');
    }
    source.push_str(&harness);

    Ok(AssembledScript { source, markers })
}
