//! Shared helpers for integration tests.

use lopdf::{dictionary, Document, Object, Stream};

/// Builds a minimal one-page PDF with the given text, rendered as a
/// Courier text stream that lopdf can extract back out.
pub fn create_text_pdf(text: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");

    let pages_id = doc.new_object_id();
    let font_id = doc.new_object_id();
    let resources_id = doc.new_object_id();
    let content_id = doc.new_object_id();
    let page_id = doc.new_object_id();

    doc.objects.insert(
        font_id,
        Object::Dictionary(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        }),
    );

    doc.objects.insert(
        resources_id,
        Object::Dictionary(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        }),
    );

    let content_stream = Stream::new(dictionary! {}, format_text_for_pdf(text).into_bytes());
    doc.objects
        .insert(content_id, Object::Stream(content_stream));

    doc.objects.insert(
        page_id,
        Object::Dictionary(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Resources" => resources_id,
            "Contents" => content_id,
        }),
    );

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("Failed to build test PDF");
    buffer
}

fn format_text_for_pdf(text: &str) -> String {
    // One BT/ET block per line: lopdf's extract_text only emits a line
    // break at ET, so a single block with T* would collapse the lines.
    let mut content = String::new();
    let mut y = 742;
    for line in text.lines().take(60) {
        content.push_str("BT\n");
        content.push_str("/F1 10 Tf\n");
        content.push_str(&format!("50 {} Td\n", y));
        content.push_str(&format!("({}) Tj\n", escape_pdf_string(line)));
        content.push_str("ET\n");
        y -= 12;
    }
    content
}

fn escape_pdf_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '(' => "\\(".to_string(),
            ')' => "\\)".to_string(),
            '\\' => "\\\\".to_string(),
            c if c.is_ascii() && !c.is_control() => c.to_string(),
            _ => " ".to_string(),
        })
        .collect()
}
