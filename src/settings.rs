// SPDX-License-Identifier: Apache-2.0

//! Parser settings.

/// Options consulted by the JSON parser and the stream reader.
///
/// The reader takes a copy at construction, so changing settings after a
/// parse has started has no effect on that parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseSettings {
    /// Accept `//` and `/* */` comments.
    pub enable_json_comment: bool,
    /// Surface warnings at all.
    pub enable_warning_message: bool,
    /// Re-raise every warning as a parse error.
    pub treat_warning_as_error: bool,
    /// Number of warnings reported verbatim before collapsing to `...`.
    pub warning_maximum: usize,
    /// Reader window size in bytes; values below the reader's minimum of
    /// 32 are clamped up.
    pub stream_buffer_size: usize,
    /// Columns a `\t` advances the position counter by.
    pub indent_width: usize,
}

impl Default for ParseSettings {
    fn default() -> Self {
        Self {
            enable_json_comment: true,
            enable_warning_message: true,
            treat_warning_as_error: false,
            warning_maximum: 4,
            stream_buffer_size: 8192,
            indent_width: 4,
        }
    }
}
