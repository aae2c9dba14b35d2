//! Prompt construction for lesson and chapter requests.

use nst_core::{ChapterQuery, ContentRequest, ContentType};

fn class_label(class_level: impl std::fmt::Display, stream: Option<impl std::fmt::Display>) -> String {
    match stream {
        Some(stream) => format!("Class {} ({})", class_level, stream),
        None => format!("Class {}", class_level),
    }
}

/// Instruction shared by every request.
pub fn system_instruction(language: nst_core::Language) -> String {
    format!(
        "You are an expert teacher for Indian school boards. \
         Write accurate, syllabus-aligned material in {}. \
         Respond with JSON only, no markdown fences.",
        language
    )
}

pub fn lesson_prompt(request: &ContentRequest) -> String {
    let class = class_label(request.class_level, request.stream);
    let context = format!(
        "Board: {}\n{}\nSubject: {}\nChapter: {} ({})",
        request.board, class, request.subject, request.chapter.title, request.chapter.id
    );

    let task = match request.content_type {
        ContentType::Notes => {
            "Write concise revision notes. Return an object with \
             \"title\", \"summary\" and \"sections\" (array of {\"heading\", \"points\"})."
        }
        ContentType::PremiumNotes => {
            "Write detailed exam-oriented notes with solved examples and common mistakes. \
             Return an object with \"title\", \"summary\", \"sections\" \
             (array of {\"heading\", \"points\"}) and \"examTips\" (array of strings)."
        }
        ContentType::Mcq => {
            "Write 10 multiple choice questions. Return an object with \"title\" and \
             \"questions\" (array of {\"question\", \"options\" (4 strings), \
             \"correctAnswer\" (index 0-3), \"explanation\"})."
        }
        ContentType::Video => {
            "Suggest a short video lesson plan. Return an object with \"title\", \
             \"outline\" (array of strings) and \"searchQueries\" (array of strings)."
        }
    };

    format!("{}\n\n{}", context, task)
}

pub fn chapters_prompt(query: &ChapterQuery) -> String {
    format!(
        "Board: {}\n{}\nSubject: {}\n\n\
         List every chapter of this subject in syllabus order. Return a JSON array of \
         {{\"id\", \"title\", \"description\"}} where \"id\" is a short stable slug.",
        query.board,
        class_label(query.class_level, query.stream),
        query.subject
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nst_core::{Board, Chapter, ClassLevel, Language, Stream};

    #[test]
    fn test_lesson_prompt_mentions_selection() {
        let request = ContentRequest::new(
            Board::Cbse,
            ClassLevel::new(11).unwrap(),
            Some(Stream::Commerce),
            "Accountancy",
            Chapter::new("ch-2", "Theory Base"),
            ContentType::Mcq,
        )
        .unwrap();
        let prompt = lesson_prompt(&request);
        assert!(prompt.contains("CBSE"));
        assert!(prompt.contains("Class 11 (Commerce)"));
        assert!(prompt.contains("Theory Base"));
        assert!(prompt.contains("questions"));
    }

    #[test]
    fn test_chapters_prompt_omits_missing_stream() {
        let query = ChapterQuery::new(Board::Bseb, ClassLevel::new(9).unwrap(), None, "Science").unwrap();
        let prompt = chapters_prompt(&query);
        assert!(prompt.contains("Class 9\n"));
        assert!(system_instruction(Language::Hindi).contains("Hindi"));
    }
}
