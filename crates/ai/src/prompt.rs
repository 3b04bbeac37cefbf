use thiserror::Error;

use adprompt_core::{DomainError, WorkItemId};
use adprompt_products::WorkItem;

/// Placeholder substituted with the work item's title.
pub const TITLE_PLACEHOLDER: &str = "{title}";

/// Fragment of the built-in template that only appears in a response when the
/// model echoed the instructions back instead of answering.
pub const DEFAULT_ECHO_MARKER: &str = "You are an Elite AI";

/// Built-in instruction template for the two-part commercial video prompt.
///
/// The timing, word-count and camera-angle rules are business content; the
/// pipeline only relies on `{title}` and on the output contract (a JSON object
/// with `part1_prompt` and `part2_prompt`).
pub const DEFAULT_TEMPLATE: &str = r#"You are an Elite AI Commercial Director.
Your task is to generate a 2-part video prompt must be **22 to 28 words** per part to JSON Only for Google Veo 3 based on the raw product title. DO NOT PRINT TO CHAT PROCESSING LOGIC FOR EVERY STEPS.

**Input Product Title:** "{title}"
**START INTERNAL LOGIC (APPLY SILENTLY - DON'T PRINT TO CHAT):**
**STEP 0: CREATE "SPOKEN SHORT NAME" (INTERNAL PROCESSING)**
1.  Analyze the long title.
2.  Extract ONLY the **Category + Brand/Key Feature** to create a natural "Short Name" (Max 3-5 words).
    - Example Input: "Quần Bò Jean Nữ Ống Loe đứng CANA Jeans Cạp Cao MS21"
    - Example Output Short Name: **"Quần Jean Loe CANA"**

**STEP 1: TIMING & SCRIPT RULES (UPDATED)**
- **Duration:** Exactly 8 seconds per part.
- **Word Count:** Vietnamese script must be **22 to 28 words** per part.
- **Pacing:** Very fast, high-density energetic delivery (Livestream style).
- **Naming Rule:** ONLY use the **Short Name** generated in Step 0.
- **Content:** Fill the time with benefits, do not leave silence.

**STEP 2: VISUAL LOGIC**
- **Category Awareness:** Apply correct camera angles (Footwear=Low angle, Fashion=Medium shot, Cosmetics=Close up).
- **Visual Fidelity:** Describe the product using details from the full title (color, material), ensuring 4K photorealism.

**PART 1 (0s-8s): The Hook & Pain Point**
- **Visual:** Dramatic reveal, problem visualization, or high-end product showcase.
- **Script:**
  1. Start INSTANTLY with a question or strong statement.
  2. Mention the [Short Name].
  3. Pack the script with adjectives and energetic filler words ("cực đỉnh", "siêu mê", "ngay đi").
- **Example Structure:** "Bà nào đùi to chân ngắn mà chưa biết đến em [Short Name] này là tiếc hùi hụi nha! Thiết kế cạp cao hack dáng siêu đỉnh, mặc vào là chân dài miên man, che khuyết điểm cực tốt luôn ạ."

**PART 2 (8s-16s): Feature & CTA**
- **Visual:** Product in use/motion showing results. Dynamic movement.
- **Script:**
  1. Focus on the best feature (material, durability, effect).
  2. End with a breathless, urgent CTA.
- **Example Structure:** "Chất vải co giãn bốn chiều, bao giặt máy không lo bai xù. Số lượng trong kho còn cực ít, các bác nhanh tay bấm ngay vào giỏ hàng góc trái chốt đơn liền kẻo hết size đẹp nhé!"
**END INTERNAL LOGIC (APPLY SILENTLY - DON'T PRINT TO CHAT):**

**Output Format (JSON Only):**
{
  "part1_prompt": "cinematic 4k shot, [Camera Logic], [Detailed Visual of Product using Full Title details], professional lighting --text-input \"[Vietnamese Script Part 1 (~35 words)]\"",
  "part2_prompt": "cinematic 4k shot, [Camera Logic], [Detailed Visual of Product in action], aesthetic style --text-input \"[Vietnamese Script Part 2 (~35 words)]\""
}
"#;

/// Per-record render failure. The record is skipped without touching the
/// retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("work item {0} has no title to render")]
    MissingTitle(WorkItemId),
}

/// Fixed instruction template plus the marker used to detect echoed prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
    echo_marker: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEMPLATE.to_string(),
            echo_marker: DEFAULT_ECHO_MARKER.to_string(),
        }
    }
}

impl PromptTemplate {
    /// Build a custom template. It must mention `{title}` and the echo marker
    /// must be non-empty.
    pub fn new(text: impl Into<String>, echo_marker: impl Into<String>) -> Result<Self, DomainError> {
        let text = text.into();
        let echo_marker = echo_marker.into();

        if !text.contains(TITLE_PLACEHOLDER) {
            return Err(DomainError::validation(format!(
                "prompt template must contain the {TITLE_PLACEHOLDER} placeholder"
            )));
        }
        if echo_marker.trim().is_empty() {
            return Err(DomainError::validation("echo marker must not be empty"));
        }

        Ok(Self { text, echo_marker })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn echo_marker(&self) -> &str {
        &self.echo_marker
    }

    /// Substitute the item's title into every `{title}` occurrence.
    pub fn render(&self, item: &WorkItem) -> Result<String, RenderError> {
        let title = item
            .title()
            .ok_or(RenderError::MissingTitle(item.id_typed()))?;
        Ok(self.text.replace(TITLE_PLACEHOLDER, title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: Option<&str>) -> WorkItem {
        WorkItem::new(WorkItemId::new(3), title.map(str::to_string), None)
    }

    #[test]
    fn renders_title_into_default_template() {
        let template = PromptTemplate::default();
        let prompt = template.render(&item(Some("Dép Sục Nam Crocs Đen"))).unwrap();

        assert!(prompt.contains(r#"**Input Product Title:** "Dép Sục Nam Crocs Đen""#));
        assert!(!prompt.contains(TITLE_PLACEHOLDER));
        assert!(prompt.contains("\"part1_prompt\""));
        assert!(prompt.contains("\"part2_prompt\""));
        assert!(prompt.starts_with(DEFAULT_ECHO_MARKER));
    }

    #[test]
    fn missing_or_blank_title_is_a_render_error() {
        let template = PromptTemplate::default();
        assert_eq!(
            template.render(&item(None)),
            Err(RenderError::MissingTitle(WorkItemId::new(3)))
        );
        assert!(template.render(&item(Some("  \t"))).is_err());
    }

    #[test]
    fn custom_template_requires_placeholder() {
        assert!(PromptTemplate::new("no placeholder here", "marker").is_err());
        assert!(PromptTemplate::new("Title: {title}", " ").is_err());

        let template = PromptTemplate::new("[{title}] and again {title}", "Title:").unwrap();
        assert_eq!(template.render(&item(Some("Áo"))).unwrap(), "[Áo] and again Áo");
        assert_eq!(template.echo_marker(), "Title:");
    }
}
