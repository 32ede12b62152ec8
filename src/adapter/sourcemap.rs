use camino::Utf8Path;
use serde::Serialize;

use super::write_output;
use crate::error::AdapterError;

/// A version 3 source map that lists the original sources without any
/// per-segment mappings. Enough for dev tools to show the sources.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceMap<'a> {
    version: u8,
    file: &'a str,
    sources: Vec<&'a str>,
    sources_content: Vec<&'a str>,
    names: [&'a str; 0],
    mappings: &'a str,
}

/// Writes `<output>.map` next to `output` and returns the comment that links
/// it, to be appended to the output file.
pub(crate) fn write_coarse(
    output: &Utf8Path,
    sources: &[(&str, &str)],
) -> Result<String, AdapterError> {
    let file = output.file_name().unwrap_or_default();
    let map = SourceMap {
        version: 3,
        file,
        sources: sources.iter().map(|(name, _)| *name).collect(),
        sources_content: sources.iter().map(|(_, content)| *content).collect(),
        names: [],
        mappings: "",
    };

    let map_name = format!("{file}.map");
    write_output(&output.with_file_name(&map_name), serde_json::to_vec(&map)?)?;

    Ok(map_name)
}
