//! Typed client for the campus REST endpoints used by the course, payment,
//! student and admin views.
//!
//! Calls are gated on the current session: student calls need a signed-in
//! identity, admin calls need the `admin` role.

use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::adapters::http_client::{json_headers, HttpClient, HttpMethod, ReqwestHttpClient, SimpleHttpResponse};
use crate::adapters::rest_backend::url_with_segment;
use crate::auth::service::SessionHandle;
use crate::auth::token::Role;
use crate::config::SessionConfig;
use crate::error::{errors, CampusResult};

pub mod types;
pub use types::{
    Assignment, Batch, Course, CourseProgress, EnrollRequest, Enrollment, NewCourse, Progress,
    SyllabusEntry,
};

/// Client for course, enrollment and assignment endpoints
pub struct CampusApi {
    http_client: Arc<dyn HttpClient>,
    config: SessionConfig,
    session: SessionHandle,
}

impl CampusApi {
    pub fn new(config: SessionConfig, session: SessionHandle) -> Self {
        Self::with_http_client(config, session, Arc::new(ReqwestHttpClient::new()))
    }

    /// Create a client with a custom HTTP client
    pub fn with_http_client(
        config: SessionConfig,
        session: SessionHandle,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            http_client,
            config,
            session,
        }
    }

    /// Headers carrying the stored session token, when there is one
    async fn headers(&self) -> HashMap<String, String> {
        match self.session.session_token().await {
            Ok(token) => json_headers(token.as_ref().map(|t| t.as_str())),
            Err(e) => {
                warn!(error = %e, "Session token unreadable, sending request without it");
                json_headers(None)
            }
        }
    }

    async fn send(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> CampusResult<SimpleHttpResponse> {
        let headers = self.headers().await;
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let result = match method {
            HttpMethod::GET => self.http_client.get(url, headers).await,
            HttpMethod::POST => self.http_client.post(url, headers, body).await,
            HttpMethod::PATCH => self.http_client.patch(url, headers, body).await,
        };
        result.map_err(|e| errors::api_request_failed(method.as_str(), url, 0, format!("{:#}", e)))
    }

    /// Send and decode, mapping 404 to `NotFound` and other failures to `ApiRequestFailed`
    async fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<serde_json::Value>,
        resource: &str,
    ) -> CampusResult<T> {
        let response = self.send(method, url, body).await?;
        if response.is_not_found() {
            return Err(errors::not_found(resource));
        }
        if !response.is_success() {
            return Err(errors::api_request_failed(
                method.as_str(),
                url,
                response.status(),
                response.body(),
            ));
        }
        Ok(serde_json::from_str(response.body())?)
    }

    /// Email of the signed-in identity
    async fn student_email(&self, action: &str) -> CampusResult<String> {
        self.session
            .state()
            .await
            .email()
            .map(str::to_string)
            .ok_or_else(|| errors::not_signed_in(action))
    }

    async fn require_admin(&self, action: &str) -> CampusResult<()> {
        let state = self.session.state().await;
        match state.role() {
            None => Err(errors::not_signed_in(action)),
            Some(Role::Admin) => Ok(()),
            Some(role) => {
                debug!(action, role = %role, "Admin action refused");
                Err(errors::permission_denied(action, Role::Admin.as_str()))
            }
        }
    }

    pub async fn list_courses(&self) -> CampusResult<Vec<Course>> {
        let url = self.config.api_url("/api/courses");
        self.request(HttpMethod::GET, &url, None, "courses").await
    }

    pub async fn course(&self, course_id: &str) -> CampusResult<Course> {
        let url = url_with_segment(&self.config.api_url("/api/courses"), &[course_id])?;
        self.request(HttpMethod::GET, &url, None, &format!("course {}", course_id))
            .await
    }

    #[instrument(skip(self, new_course), fields(title = %new_course.title))]
    pub async fn create_course(&self, new_course: &NewCourse) -> CampusResult<Course> {
        self.require_admin("create_course").await?;
        new_course.validate()?;
        let url = self.config.api_url("/api/courses");
        let course: Course = self
            .request(
                HttpMethod::POST,
                &url,
                Some(serde_json::to_value(new_course)?),
                "courses",
            )
            .await?;
        info!(course_id = %course.id, "Course created");
        Ok(course)
    }

    /// Enroll the signed-in student in a course after payment
    #[instrument(skip(self, phone))]
    pub async fn enroll(&self, phone: &str, course_title: &str) -> CampusResult<serde_json::Value> {
        let user_email = self.student_email("enroll").await?;
        if phone.trim().is_empty() {
            return Err(errors::invalid_input("phone", "a payment number is required"));
        }
        let request = EnrollRequest {
            phone: phone.trim().to_string(),
            user_email,
            course_title: course_title.to_string(),
        };
        let url = self.config.api_url("/api/student/enroll");
        let receipt = self
            .request(
                HttpMethod::POST,
                &url,
                Some(serde_json::to_value(&request)?),
                "enrollment",
            )
            .await?;
        info!(course_title, "Enrollment recorded");
        Ok(receipt)
    }

    pub async fn my_enrollments(&self) -> CampusResult<Vec<Enrollment>> {
        let email = self.student_email("my_enrollments").await?;
        let url = url_with_segment(
            &self.config.api_url("/api/student/enrollments"),
            &[email.as_str()],
        )?;
        self.request(HttpMethod::GET, &url, None, "enrollments").await
    }

    /// Enrollment of the signed-in student in one course, if any
    pub async fn enrollment(&self, course_id: &str) -> CampusResult<Option<Enrollment>> {
        let email = self.student_email("enrollment").await?;
        let url = url_with_segment(
            &self.config.api_url("/api/student/enrollment"),
            &[email.as_str(), course_id],
        )?;
        match self
            .request::<Option<Enrollment>>(HttpMethod::GET, &url, None, "enrollment")
            .await
        {
            Err(e) if e.code == crate::error::ErrorCode::NotFound => Ok(None),
            other => other,
        }
    }

    /// Course page view: the syllabus against the student's completed lessons
    pub async fn course_progress(&self, course_id: &str) -> CampusResult<CourseProgress> {
        let course = self.course(course_id).await?;
        let completed = self
            .enrollment(course_id)
            .await?
            .map(|e| e.completed_lessons)
            .unwrap_or_default();
        Ok(CourseProgress::new(&course, &completed))
    }

    pub async fn complete_lesson(&self, course_id: &str, lesson_title: &str) -> CampusResult<()> {
        let user_email = self.student_email("complete_lesson").await?;
        let url = self.config.api_url("/api/student/complete-lesson");
        let body = json!({
            "userEmail": user_email,
            "courseId": course_id,
            "lessonTitle": lesson_title,
        });
        let _: serde_json::Value = self
            .request(HttpMethod::POST, &url, Some(body), "lesson")
            .await?;
        debug!(course_id, lesson_title, "Lesson marked complete");
        Ok(())
    }

    /// Mark a lesson completed on a dashboard enrollment, returning the updated enrollment
    pub async fn mark_lesson_completed(
        &self,
        enrollment_id: &str,
        lesson_title: &str,
    ) -> CampusResult<Enrollment> {
        self.student_email("mark_lesson_completed").await?;
        let url = url_with_segment(
            &self.config.api_url("/api/student/enrollments"),
            &[enrollment_id, "complete"],
        )?;

        #[derive(serde::Deserialize)]
        struct Updated {
            enrollment: Enrollment,
        }

        let updated: Updated = self
            .request(
                HttpMethod::PATCH,
                &url,
                Some(json!({ "lessonTitle": lesson_title })),
                &format!("enrollment {}", enrollment_id),
            )
            .await?;
        Ok(updated.enrollment)
    }

    /// Admin: everyone enrolled in a course
    pub async fn course_enrollments(&self, course_title: &str) -> CampusResult<Vec<Enrollment>> {
        self.require_admin("course_enrollments").await?;
        let url = url_with_segment(
            &self.config.api_url("/api/student/enrollments"),
            &[course_title],
        )?;
        self.request(HttpMethod::GET, &url, None, "enrollments").await
    }

    /// Admin: assignment submissions for a course
    pub async fn course_assignments(&self, course_id: &str) -> CampusResult<Vec<Assignment>> {
        self.require_admin("course_assignments").await?;
        let url = url_with_segment(
            &self.config.api_url("/api/admin/assignments/course"),
            &[course_id],
        )?;
        self.request(HttpMethod::GET, &url, None, "assignments").await
    }
}
