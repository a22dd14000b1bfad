use serde::{Deserialize, Serialize};

use crate::error::{errors, CampusResult};

/// One syllabus item. Older courses store bare video links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SyllabusEntry {
    Lesson {
        title: String,
        #[serde(rename = "videoUrl", default)]
        video_url: Option<String>,
    },
    Link(String),
}

impl SyllabusEntry {
    /// Title used to track completion; bare links are tracked by URL
    pub fn title(&self) -> &str {
        match self {
            SyllabusEntry::Lesson { title, .. } => title,
            SyllabusEntry::Link(url) => url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructor: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub syllabus: Vec<SyllabusEntry>,
    #[serde(default)]
    pub batches: Vec<Batch>,
}

/// Body of an admin "add course" request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCourse {
    pub title: String,
    pub description: String,
    pub instructor: String,
    pub price: f64,
    pub category: String,
    pub tags: Vec<String>,
    pub syllabus: Vec<SyllabusEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batches: Vec<Batch>,
}

impl NewCourse {
    pub fn validate(&self) -> CampusResult<()> {
        if self.title.trim().is_empty() {
            return Err(errors::invalid_input("title", "must not be empty"));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(errors::invalid_input("price", "must be a non-negative amount"));
        }
        Ok(())
    }
}

/// Completion flag of one lesson in an enrollment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub lesson_title: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    #[serde(default)]
    pub course_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub progress: Vec<Progress>,
    #[serde(default)]
    pub completed_lessons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_date: Option<String>,
}

impl Enrollment {
    /// Completed share of tracked lessons, 0..=100. No lessons counts as one.
    pub fn progress_percent(&self) -> u8 {
        let total = self.progress.len().max(1);
        let completed = self.progress.iter().filter(|p| p.completed).count();
        percent(completed, total)
    }
}

/// Payment form submitted to enroll in a course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    pub phone: String,
    pub user_email: String,
    pub course_title: String,
}

/// Assignment submission as listed on the admin dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub lesson_id: String,
    pub link: String,
    pub user_email: String,
    #[serde(default)]
    pub user_name: String,
    pub submitted_at: String,
}

/// Per-lesson completion of one course for the signed-in student
#[derive(Debug, Clone, PartialEq)]
pub struct CourseProgress {
    pub course_id: String,
    pub lessons: Vec<(String, bool)>,
}

impl CourseProgress {
    pub fn new(course: &Course, completed_lessons: &[String]) -> Self {
        let lessons = course
            .syllabus
            .iter()
            .map(|entry| {
                let title = entry.title().to_string();
                let done = completed_lessons.contains(&title);
                (title, done)
            })
            .collect();
        Self {
            course_id: course.id.clone(),
            lessons,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.lessons.iter().filter(|(_, done)| *done).count()
    }

    /// Rounded completion percentage; an empty syllabus is 0
    pub fn percent(&self) -> u8 {
        if self.lessons.is_empty() {
            return 0;
        }
        percent(self.completed_count(), self.lessons.len())
    }
}

fn percent(completed: usize, total: usize) -> u8 {
    let ratio = (completed.min(total) as f64) / (total as f64);
    (ratio * 100.0).round() as u8
}
