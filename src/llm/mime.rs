//! File extension to MIME type lookup and assistant tool eligibility.

/// Fallback content type for unknown extensions.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const MIME_TYPES: &[(&str, &str)] = &[
    ("c", "text/x-c"),
    ("cpp", "text/x-c++"),
    ("cs", "text/x-csharp"),
    ("css", "text/css"),
    ("csv", "application/csv"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("gif", "image/gif"),
    ("go", "text/x-golang"),
    ("html", "text/html"),
    ("java", "text/x-java"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("md", "text/markdown"),
    ("pdf", "application/pdf"),
    ("php", "text/x-php"),
    ("png", "image/png"),
    (
        "pptx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    ),
    ("py", "text/x-python"),
    ("rb", "text/x-ruby"),
    ("sh", "application/x-sh"),
    ("tar", "application/x-tar"),
    ("tex", "text/x-tex"),
    ("ts", "application/typescript"),
    ("txt", "text/plain"),
    ("webp", "image/webp"),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
];

const IMAGE_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg", "image/gif", "image/webp"];

const FILE_SEARCH_TYPES: &[&str] = &[
    "text/x-c",
    "text/x-csharp",
    "text/x-c++",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/html",
    "text/x-java",
    "application/json",
    "text/markdown",
    "application/pdf",
    "text/x-php",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "text/x-python",
    "text/x-script.python",
    "text/x-ruby",
    "text/x-tex",
    "text/plain",
    "text/css",
    "text/javascript",
    "application/x-sh",
    "application/typescript",
];

const CODE_INTERPRETER_EXTRA_TYPES: &[&str] = &[
    "application/csv",
    "application/x-tar",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/xml",
    "text/xml",
    "application/zip",
];

/// Content type for a file name, based on its extension.
#[must_use]
pub fn content_type_for(file_name: &str) -> &'static str {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return DEFAULT_CONTENT_TYPE;
    };
    let ext = ext.to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map_or(DEFAULT_CONTENT_TYPE, |(_, mime)| mime)
}

/// Whether the content type is an image a vision model can read.
#[must_use]
pub fn is_image(content_type: &str) -> bool {
    IMAGE_TYPES.contains(&content_type)
}

/// Whether the file can be indexed by the `file_search` tool.
#[must_use]
pub fn supports_file_search(content_type: &str) -> bool {
    FILE_SEARCH_TYPES.contains(&content_type)
}

/// Whether the file can be loaded by the `code_interpreter` tool.
#[must_use]
pub fn supports_code_interpreter(content_type: &str) -> bool {
    IMAGE_TYPES.contains(&content_type)
        || FILE_SEARCH_TYPES.contains(&content_type)
        || CODE_INTERPRETER_EXTRA_TYPES.contains(&content_type)
}
