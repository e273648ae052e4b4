//! HTML email bodies. Every template returns an HTML part and a plain-text
//! fallback.

use crate::models::{
    announcement::Announcement,
    tenant::School,
    user::{User, UserRole},
};

const BRAND: &str = "School Management System";
const ACCENT: &str = "#16a34a";

#[derive(Debug, Clone)]
pub struct EmailTemplate {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// The four welcome variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WelcomeKind {
    SchoolAdmin,
    Teacher,
    Student,
    Parent,
}

impl WelcomeKind {
    /// Roles without a dedicated template get the teacher one.
    pub fn for_role(role: UserRole) -> Self {
        match role {
            UserRole::SchoolAdmin => WelcomeKind::SchoolAdmin,
            UserRole::Student => WelcomeKind::Student,
            UserRole::Parent => WelcomeKind::Parent,
            UserRole::Teacher
            | UserRole::SubAdmin
            | UserRole::Receptionist
            | UserRole::Accountant
            | UserRole::Librarian => WelcomeKind::Teacher,
        }
    }

    fn copy(self) -> WelcomeCopy {
        match self {
            WelcomeKind::SchoolAdmin => WelcomeCopy {
                portal: "School Management System",
                intro: "Your school account has been created successfully!",
                details_heading: "Account Details",
                features_heading: "Getting Started",
                features: &[
                    "Sign in to your dashboard using the credentials below",
                    "Complete your school profile setup",
                    "Add your first students and teachers",
                    "Explore all the features available in your plan",
                ],
                cta: "Sign In to Dashboard",
                footer: "Need help? Contact our support team.",
            },
            WelcomeKind::Teacher => WelcomeCopy {
                portal: "Teacher Portal",
                intro: "Your teacher account has been created!",
                details_heading: "Account Details",
                features_heading: "What You Can Do",
                features: &[
                    "Manage your classes and students",
                    "Take attendance and track student progress",
                    "Communicate with students and parents",
                    "Read and publish school announcements",
                ],
                cta: "Access Teacher Portal",
                footer: "Questions? Contact your school administrator.",
            },
            WelcomeKind::Student => WelcomeCopy {
                portal: "Student Portal",
                intro: "Your student account has been created!",
                details_heading: "Student Details",
                features_heading: "Student Portal Features",
                features: &[
                    "View your class schedule",
                    "Check attendance records",
                    "Read school announcements",
                    "Communicate with teachers",
                ],
                cta: "Access Student Portal",
                footer: "Questions? Contact your teachers or school administration.",
            },
            WelcomeKind::Parent => WelcomeCopy {
                portal: "Parent Portal",
                intro: "Your parent account has been created!",
                details_heading: "Account Details",
                features_heading: "Parent Portal Features",
                features: &[
                    "Monitor your child's attendance",
                    "Communicate with teachers and school staff",
                    "Receive important school announcements",
                    "Keep your contact details up to date",
                ],
                cta: "Access Parent Portal",
                footer: "Stay connected with your child's education journey!",
            },
        }
    }
}

struct WelcomeCopy {
    portal: &'static str,
    intro: &'static str,
    details_heading: &'static str,
    features_heading: &'static str,
    features: &'static [&'static str],
    cta: &'static str,
    footer: &'static str,
}

/// Everything a welcome email may mention.
pub struct WelcomeContext<'a> {
    pub user: &'a User,
    pub school: &'a School,
    pub temp_password: Option<&'a str>,
    /// Students only.
    pub parent_emails: &'a [String],
    /// Parents only.
    pub children_names: &'a [String],
    pub login_url: &'a str,
}

pub fn welcome(kind: WelcomeKind, ctx: &WelcomeContext<'_>) -> EmailTemplate {
    let copy = kind.copy();
    let school = &ctx.school.name;

    let mut details: Vec<(&str, String)> = vec![
        ("Name", ctx.user.display_name()),
        ("Email", ctx.user.email.clone()),
    ];
    match kind {
        WelcomeKind::SchoolAdmin => {
            details.push(("Role", UserRole::SchoolAdmin.label().to_string()));
        }
        WelcomeKind::Teacher => {
            details.push(("Role", ctx.user.role.label().to_string()));
            details.push((
                "Employee ID",
                ctx.user.employee_id.clone().unwrap_or_else(|| "Will be assigned".into()),
            ));
        }
        WelcomeKind::Student => {
            details.push((
                "Student ID",
                ctx.user
                    .admission_number
                    .clone()
                    .unwrap_or_else(|| "Will be assigned".into()),
            ));
        }
        WelcomeKind::Parent => {
            details.push(("Role", UserRole::Parent.label().to_string()));
            details.push(("Children", ctx.children_names.join(", ")));
        }
    }
    details.push(("School", school.clone()));
    if let Some(pw) = ctx.temp_password {
        details.push(("Temporary Password", pw.to_string()));
    }

    let headline = match kind {
        WelcomeKind::SchoolAdmin => format!("Welcome to {BRAND}"),
        _ => format!("Welcome to {school}"),
    };

    let mut footer = vec![copy.footer.to_string()];
    if kind == WelcomeKind::Student && !ctx.parent_emails.is_empty() {
        footer.insert(0, format!("Parents/Guardians: {}", ctx.parent_emails.join(", ")));
    }

    let details_html: String = details
        .iter()
        .map(|(k, v)| format!("<p><strong>{k}:</strong> {}</p>", escape_html(v)))
        .collect();
    let features_html: String = copy
        .features
        .iter()
        .map(|f| format!("<li>{f}</li>"))
        .collect();

    let body = format!(
        r#"<div style="background:#f8f9fa;padding:20px;border-radius:8px;margin-bottom:20px">
  <h2 style="color:#333;margin-top:0">{heading}</h2>
  {details_html}
</div>
<h3 style="color:#333">{features_heading}</h3>
<ul style="color:#555;line-height:1.6">{features_html}</ul>
{button}"#,
        heading = copy.details_heading,
        features_heading = copy.features_heading,
        button = button(ctx.login_url, copy.cta),
    );

    let mut text = format!("{headline}\n\n{}\n\n", copy.intro);
    for (k, v) in &details {
        text.push_str(&format!("{k}: {v}\n"));
    }
    text.push_str(&format!("\nSign in: {}\n\n{}\n", ctx.login_url, footer.join("\n")));

    EmailTemplate {
        subject: format!("Welcome to {school} - {}", copy.portal),
        html: wrap_html(&escape_html(&headline), copy.intro, &body, &footer),
        text,
    }
}

pub fn password_reset(user: &User, reset_link: &str) -> EmailTemplate {
    let link = escape_html(reset_link);
    let body = format!(
        r#"<p>Hello {name},</p>
<p>You requested to reset your password for your {BRAND} account. Click the button below to create a new password:</p>
{button}
<div style="background:#fff3cd;padding:15px;border-radius:6px;margin:20px 0">
  <p style="margin:0;color:#856404"><strong>Security Note:</strong> This link will expire in 1 hour. If you didn't request this password reset, please ignore this email.</p>
</div>
<p>If you're having trouble clicking the button, copy and paste this URL into your browser:</p>
<p style="word-break:break-all">{link}</p>"#,
        name = escape_html(&user.profile.first_name),
        button = button(reset_link, "Reset Password"),
    );

    let text = format!(
        "Hello {},\n\nYou requested to reset your password. Open this link to choose a new one:\n{reset_link}\n\n\
         This link will expire in 1 hour. If you didn't request this password reset, please ignore this email.\n",
        user.profile.first_name
    );

    EmailTemplate {
        subject: format!("Password Reset Request - {BRAND}"),
        html: wrap_html(
            "Password Reset Request",
            "We received a request to reset your password",
            &body,
            &[],
        ),
        text,
    }
}

pub fn announcement(a: &Announcement, school: &School, recipient_name: &str) -> EmailTemplate {
    let date = a.created_at.format("%Y-%m-%d").to_string();
    let priority = a.priority.as_str();
    let body = format!(
        r#"<div style="background:#f8f9fa;padding:20px;border-radius:8px;margin-bottom:20px">
  <h2 style="color:#333;margin-top:0">{title}</h2>
  <p style="color:#666;margin-bottom:15px"><strong>Date:</strong> {date}<br><strong>Priority:</strong> {priority}</p>
  <div style="color:#333;line-height:1.6">{content}</div>
</div>"#,
        title = escape_html(&a.title),
        content = multiline(&a.content),
    );

    EmailTemplate {
        subject: format!("{} - {}", school.name, a.title),
        html: wrap_html(
            &escape_html(&school.name),
            "School Announcement",
            &body,
            &[format!("This announcement was sent to: {recipient_name}")],
        ),
        text: format!(
            "{}\n\n{}\nDate: {date}\nPriority: {priority}\n\n{}\n\nThis announcement was sent to: {recipient_name}\n",
            school.name, a.title, a.content
        ),
    }
}

pub fn bulk_notification(
    school: &School,
    subject: &str,
    content: &str,
    recipient_name: &str,
) -> EmailTemplate {
    let body = format!(
        r#"<div style="background:#f8f9fa;padding:20px;border-radius:8px;margin-bottom:20px">
  <h2 style="color:#333;margin-top:0">{title}</h2>
  <div style="color:#333;line-height:1.6">{content}</div>
</div>"#,
        title = escape_html(subject),
        content = multiline(content),
    );

    EmailTemplate {
        subject: subject.to_string(),
        html: wrap_html(
            &escape_html(&school.name),
            "Important Notification",
            &body,
            &[format!("This message was sent to: {recipient_name}")],
        ),
        text: format!(
            "{}\n\n{subject}\n\n{content}\n\nThis message was sent to: {recipient_name}\n",
            school.name
        ),
    }
}

fn button(href: &str, label: &str) -> String {
    format!(
        r#"<div style="text-align:center;margin-top:30px">
  <a href="{href}" style="background:{ACCENT};color:white;padding:12px 24px;text-decoration:none;border-radius:6px;display:inline-block">{label}</a>
</div>"#,
        href = escape_html(href),
    )
}

/// Shared layout: headline block, card body, footer lines.
fn wrap_html(headline: &str, tagline: &str, body: &str, footer: &[String]) -> String {
    let footer_html: String = footer
        .iter()
        .map(|line| format!("<p>{}</p>", escape_html(line)))
        .collect();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><meta name="viewport" content="width=device-width,initial-scale=1"></head>
<body style="margin:0;padding:0;background-color:#ffffff">
<div style="font-family:Arial,sans-serif;max-width:600px;margin:0 auto;padding:20px">
  <div style="text-align:center;margin-bottom:30px">
    <h1 style="color:{ACCENT};margin-bottom:10px">{headline}</h1>
    <p style="color:#666;font-size:16px">{tagline}</p>
  </div>
  {body}
  <div style="margin-top:30px;padding-top:20px;border-top:1px solid #eee;text-align:center;color:#666;font-size:14px">
    {footer_html}
    <p>&copy; {BRAND}. All rights reserved.</p>
  </div>
</div>
</body>
</html>"#
    )
}

/// Escapes user text, then turns newlines into `<br>`.
fn multiline(text: &str) -> String {
    escape_html(text).replace("\r\n", "\n").replace('\n', "<br>")
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
