use serde::Serialize;

use crate::models::user::UserRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NavItem {
    pub href: &'static str,
    pub label: &'static str,
}

/// Who sees an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Audience {
    Everyone,
    Admins,
    AdminsAndTeachers,
    AdminsAndParents,
    Community,
}

const ITEMS: &[(NavItem, Audience)] = &[
    (NavItem { href: "/dashboard", label: "Overview" }, Audience::Everyone),
    (NavItem { href: "/dashboard/students", label: "Students" }, Audience::AdminsAndTeachers),
    (NavItem { href: "/dashboard/teachers", label: "Teachers" }, Audience::Admins),
    (NavItem { href: "/dashboard/parents", label: "Parents" }, Audience::AdminsAndTeachers),
    (NavItem { href: "/dashboard/staff", label: "Staff" }, Audience::Admins),
    (NavItem { href: "/dashboard/classes", label: "Classes" }, Audience::AdminsAndTeachers),
    (NavItem { href: "/dashboard/attendance", label: "Attendance" }, Audience::AdminsAndTeachers),
    (NavItem { href: "/dashboard/announcements", label: "Announcements" }, Audience::Everyone),
    (NavItem { href: "/dashboard/messages", label: "Messages" }, Audience::Community),
    (NavItem { href: "/dashboard/billing", label: "Billing" }, Audience::AdminsAndParents),
    (NavItem { href: "/dashboard/reports", label: "Reports" }, Audience::AdminsAndTeachers),
    (NavItem { href: "/dashboard/settings", label: "Settings" }, Audience::Admins),
];

impl Audience {
    fn includes(self, role: UserRole) -> bool {
        match self {
            Audience::Everyone => true,
            Audience::Admins => role.is_admin(),
            Audience::AdminsAndTeachers => role.is_admin() || role == UserRole::Teacher,
            Audience::AdminsAndParents => role.is_admin() || role == UserRole::Parent,
            Audience::Community => matches!(
                role,
                UserRole::SchoolAdmin
                    | UserRole::SubAdmin
                    | UserRole::Teacher
                    | UserRole::Student
                    | UserRole::Parent
            ),
        }
    }
}

/// Sidebar entries for a role, in display order.
pub fn items_for(role: UserRole) -> Vec<NavItem> {
    ITEMS
        .iter()
        .filter(|(_, audience)| audience.includes(role))
        .map(|(item, _)| *item)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hrefs(role: UserRole) -> Vec<&'static str> {
        items_for(role).into_iter().map(|i| i.href).collect()
    }

    #[test]
    fn admins_see_everything() {
        assert_eq!(items_for(UserRole::SchoolAdmin).len(), ITEMS.len());
        assert_eq!(items_for(UserRole::SubAdmin).len(), ITEMS.len());
    }

    #[test]
    fn teachers_manage_classes_but_not_staff() {
        let h = hrefs(UserRole::Teacher);
        assert!(h.contains(&"/dashboard/attendance"));
        assert!(!h.contains(&"/dashboard/staff"));
        assert!(!h.contains(&"/dashboard/settings"));
    }

    #[test]
    fn every_role_gets_at_least_the_overview() {
        for role in UserRole::ALL {
            assert_eq!(items_for(role)[0].href, "/dashboard");
        }
        assert_eq!(
            hrefs(UserRole::Librarian),
            vec!["/dashboard", "/dashboard/announcements"]
        );
        assert!(hrefs(UserRole::Parent).contains(&"/dashboard/billing"));
    }
}
