//! Prompts for image description, structured extraction and answering.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing extraction behaviour (a new rule,
//!    a new field) means editing exactly one place.
//!
//! 2. **Testability**: unit tests inspect the built prompts directly without
//!    a live model, so prompt regressions are easy to catch.
//!
//! The extraction prompt is generated from a [`FieldTable`], so the labels
//! and meanings the model sees always match what the cleaner accepts.

use crate::schema::{FieldKind, FieldTable};
use crate::output::IMAGE_PLACEHOLDER;
use std::fmt::Write as _;

/// Delimiter introducing each image description in merged text.
pub const IMAGE_DESCRIPTION_DELIMITER: &str = "[IMAGE DESCRIPTION]";

/// Instruction sent with every image to a chat-model vision backend.
pub const IMAGE_DESCRIPTION_PROMPT: &str = r#"Describe only the factual content visible in the image:

1. If decorative/non-informational: output '<---image--->'

2. For content images:
- General Images: List visible objects, text, and measurable attributes
- Charts/Infographics: State all numerical values and labels present
- Tables: Convert to markdown table format with exact data

Rules:
* Include only directly observable information
* Use original numbers and text without modification
* Avoid any interpretation or analysis
* Preserve all labels and measurements exactly as shown"#;

const EXTRACTION_PREAMBLE: &str = r#"Bạn là một chuyên gia nhập liệu dữ liệu đang đọc các tài liệu hợp đồng và bảng giá viễn thông Việt Nam.

NHIỆM VỤ: Trích xuất TẤT CẢ các gói cước từ tài liệu và chuyển đổi thành định dạng cấu trúc JSON.

QUY TẮC XỬ LÝ DỮ LIỆU LỖI / OCR KÉM:
1. Nếu văn bản chính lặp lại vô nghĩa, bỏ qua dòng đó.
2. Tìm dữ liệu thay thế trong các phần "[IMAGE DESCRIPTION]".
3. Dữ liệu bảng trong phần mô tả ảnh được coi là chính xác hơn văn bản chính bị lỗi định dạng.
4. Chú ý các mục "Phụ lục" (Appendix).

QUY TẮC CHUẨN HÓA DỮ LIỆU:
- Giá: số nguyên (VND), bỏ dấu chấm/phẩy ngăn cách hàng nghìn ("80.000" → 80000).
- Không bao gồm các trường rỗng hoặc không tìm thấy.
- Không bịa đặt dữ liệu nếu không tìm thấy."#;

/// System prompt for structured extraction, listing every field of `table`.
pub fn extraction_system_prompt(table: &FieldTable) -> String {
    let mut out = String::from(EXTRACTION_PREAMBLE);
    out.push_str("\n\nCÁC TRƯỜNG CẦN TRÍCH XUẤT:\n");
    for spec in table.specs() {
        let kind = match spec.kind {
            FieldKind::Integer => " (số nguyên)",
            FieldKind::Enumerated | FieldKind::Text => "",
        };
        let _ = writeln!(
            out,
            "- `{}` ({}){}: {}",
            spec.name, spec.local_label, kind, spec.description
        );
    }
    let key = table.key();
    let _ = write!(
        out,
        "\nOUTPUT FORMAT:\n\
         Trả về một đối tượng JSON có khóa `packages` (mảng). Mỗi mục là một object \
         với trường bắt buộc `{}` ({}) và một object `attributes` chứa các trường còn lại, \
         dùng tên trường trong dấu ``. Trả về CHỈ JSON, không có giải thích hay markdown code block.",
        key.name, key.local_label
    );
    out
}

/// User prompt wrapping the document text for structured extraction.
pub fn extraction_user_prompt(content: &str) -> String {
    format!(
        "Phân tích tài liệu sau và trích xuất tất cả các gói cước viễn thông:\n\n\
         {content}\n\n\
         Trả về kết quả dưới dạng JSON theo định dạng đã hướng dẫn."
    )
}

/// System prompt for answer synthesis over retrieved context.
pub fn answer_system_prompt(context: &str) -> String {
    format!(
        "You are an assistant for question-answering tasks.\n\
         Use the following pieces of retrieved context to answer the question.\n\
         The context may include text content and image descriptions from a PDF document; \
         image descriptions follow the marker {IMAGE_DESCRIPTION_DELIMITER}, and \
         {IMAGE_PLACEHOLDER} marks an image that could not be described.\n\n\
         If you don't know the answer based on the provided context, just say that you don't know.\n\
         Be concise and accurate in your response.\n\n\
         Context: {context}"
    )
}

/// System prompt used when retrieval found nothing.
pub const NO_CONTEXT_SYSTEM_PROMPT: &str = "You are an assistant for question-answering tasks.\n\
No context found: the document index returned no passages for this question.\n\
Say clearly that the indexed documents do not cover the question. \
If you answer from general knowledge, state that the answer is not grounded in any document.\n\
Be concise.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_prompt_lists_every_field() {
        let table = FieldTable::telecom_packages();
        let prompt = extraction_system_prompt(&table);
        for spec in table.specs() {
            assert!(prompt.contains(&spec.local_label), "missing {}", spec.local_label);
            assert!(prompt.contains(&format!("`{}`", spec.name)));
        }
        assert!(prompt.contains("`packages`"));
    }

    #[test]
    fn extraction_user_prompt_embeds_content() {
        let p = extraction_user_prompt("Gói SD70 giá 70.000đ");
        assert!(p.contains("Gói SD70 giá 70.000đ"));
    }

    #[test]
    fn answer_prompt_embeds_context() {
        let p = answer_system_prompt("SD70 costs 70000");
        assert!(p.contains("Context: SD70 costs 70000"));
        assert!(p.contains("say that you don't know"));
    }

    #[test]
    fn no_context_prompt_says_so() {
        assert!(NO_CONTEXT_SYSTEM_PROMPT.contains("No context found"));
    }

    #[test]
    fn description_prompt_uses_placeholder() {
        assert!(IMAGE_DESCRIPTION_PROMPT.contains(IMAGE_PLACEHOLDER));
    }
}
